// src/models/attempt.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::exam::{ExamOverview, PublicQuestion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    AutoSubmitted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "IN_PROGRESS",
            AttemptStatus::Submitted => "SUBMITTED",
            AttemptStatus::AutoSubmitted => "AUTO_SUBMITTED",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(AttemptStatus::InProgress),
            "SUBMITTED" => Ok(AttemptStatus::Submitted),
            "AUTO_SUBMITTED" => Ok(AttemptStatus::AutoSubmitted),
            other => Err(format!("unknown attempt status '{other}'")),
        }
    }
}

/// Why the system, rather than the student, ended an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoSubmitReason {
    ViolationLimit,
    TimeExpired,
}

impl AutoSubmitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoSubmitReason::ViolationLimit => "VIOLATION_LIMIT",
            AutoSubmitReason::TimeExpired => "TIME_EXPIRED",
        }
    }
}

impl FromStr for AutoSubmitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIOLATION_LIMIT" => Ok(AutoSubmitReason::ViolationLimit),
            "TIME_EXPIRED" => Ok(AutoSubmitReason::TimeExpired),
            other => Err(format!("unknown auto-submit reason '{other}'")),
        }
    }
}

/// A scored answer slot, one per question index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_index: i64,
    pub selected_option: Option<i64>,
    pub time_spent: i64,
    pub is_correct: bool,
}

/// Canonical answer shape after boundary normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerInput {
    pub question_index: i64,
    pub selected_option: Option<i64>,
    pub time_spent: i64,
}

impl From<&AnswerRecord> for AnswerInput {
    fn from(record: &AnswerRecord) -> Self {
        Self {
            question_index: record.question_index,
            selected_option: record.selected_option,
            time_spent: record.time_spent,
        }
    }
}

/// Normalizes client answer entries into [`AnswerInput`]s.
///
/// Entries without an integral, non-negative `questionIndex` are dropped.
/// A non-integral `selectedOption` becomes unanswered, a missing or negative
/// `timeSpent` becomes zero.
pub fn normalize_answers(raw: &[Value]) -> Vec<AnswerInput> {
    raw.iter()
        .filter_map(|entry| {
            let question_index = entry.get("questionIndex")?.as_i64()?;
            if question_index < 0 {
                return None;
            }
            let selected_option = entry.get("selectedOption").and_then(Value::as_i64);
            let time_spent = entry
                .get("timeSpent")
                .and_then(Value::as_i64)
                .filter(|t| *t >= 0)
                .unwrap_or(0);
            Some(AnswerInput {
                question_index,
                selected_option,
                time_spent,
            })
        })
        .collect()
}

/// Represents the 'attempts' table. One row per (exam, student).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    pub status: AttemptStatus,
    pub answers: Vec<AnswerRecord>,
    pub correct_answers: i64,
    pub total_questions: i64,
    pub percentage: f64,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_saved_at: DateTime<Utc>,
    /// Seconds left on the clock as last reported.
    pub time_remaining: i64,
    pub duration_used: i64,
    pub violations_count: i64,
    pub auto_submitted: bool,
    pub auto_submit_reason: Option<AutoSubmitReason>,
}

impl Attempt {
    pub fn key(&self) -> AttemptKey {
        AttemptKey {
            exam_id: self.exam_id,
            student_id: self.student_id,
        }
    }

    pub fn progress(&self) -> ProgressView {
        ProgressView {
            status: self.status,
            answers: self
                .answers
                .iter()
                .map(|a| AnswerView {
                    question_index: a.question_index,
                    selected_option: a.selected_option,
                    time_spent: a.time_spent,
                })
                .collect(),
            time_remaining: self.time_remaining,
            started_at: self.started_at,
            last_saved_at: self.last_saved_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub exam_id: i64,
    pub student_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub exam_id: i64,
    pub student_id: i64,
    pub total_questions: i64,
    pub time_remaining: i64,
    pub started_at: DateTime<Utc>,
}

/// Fields written by a progress save.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub answers: Vec<AnswerRecord>,
    pub correct_answers: i64,
    pub total_questions: i64,
    pub percentage: f64,
    pub time_remaining: i64,
    pub last_saved_at: DateTime<Utc>,
}

/// Fields written by the terminal transition.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub status: AttemptStatus,
    pub answers: Vec<AnswerRecord>,
    pub correct_answers: i64,
    pub total_questions: i64,
    pub percentage: f64,
    pub submitted_at: DateTime<Utc>,
    pub time_remaining: i64,
    pub duration_used: i64,
    pub violations_count: i64,
    pub auto_submit_reason: Option<AutoSubmitReason>,
}

/// Outcome of a submission, as reported to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    #[serde(rename = "score")]
    pub percentage: f64,
    pub correct_answers: i64,
    pub total_questions: i64,
    pub passed: bool,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_submit_reason: Option<AutoSubmitReason>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerView {
    pub question_index: i64,
    pub selected_option: Option<i64>,
    pub time_spent: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub status: AttemptStatus,
    pub answers: Vec<AnswerView>,
    pub time_remaining: i64,
    pub started_at: DateTime<Utc>,
    pub last_saved_at: DateTime<Utc>,
}

/// Response of `POST /exam/{id}/start`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedAttempt {
    pub exam: ExamOverview,
    pub questions: Vec<PublicQuestion>,
    pub progress: ProgressView,
}

/// Final report for a terminal attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub exam_id: i64,
    pub status: AttemptStatus,
    pub answers: Vec<AnswerRecord>,
    pub correct_answers: i64,
    pub total_questions: i64,
    #[serde(rename = "score")]
    pub percentage: f64,
    pub passed: bool,
    pub grade: char,
    /// Seconds between start and submission.
    pub time_taken: i64,
    pub duration_used: i64,
    pub violations_count: i64,
    pub auto_submitted: bool,
    pub auto_submit_reason: Option<AutoSubmitReason>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// DTO for `POST /answer/save`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgressRequest {
    pub exam_id: i64,
    #[serde(default)]
    pub answers: Vec<Value>,
    pub time_remaining: Option<i64>,
}

/// DTO for `POST /exam/{id}/submit`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub answers: Vec<Value>,
    pub time_remaining: Option<i64>,
    pub violations_count: Option<i64>,
}
