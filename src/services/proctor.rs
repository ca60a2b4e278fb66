// src/services/proctor.rs

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptKey, AutoSubmitReason, SubmissionSummary},
        user::{Actor, Role},
        violation::{
            NewViolation, Severity, Violation, ViolationFilter, ViolationReceipt, ViolationStats,
            ViolationType,
        },
    },
    services::attempt::{AttemptService, SubmitCommand},
    store::{ExamDirectory, ViolationStore},
    utils::html::sanitize_description,
};

pub const DEFAULT_LIST_LIMIT: i64 = 25;
pub const MAX_LIST_LIMIT: i64 = 100;

/// A proctoring event as reported by the client, plus request context.
#[derive(Debug, Clone)]
pub struct ViolationReport {
    pub exam_id: i64,
    pub student_id: i64,
    pub violation_type: ViolationType,
    /// Overrides the type's default severity.
    pub severity: Option<Severity>,
    pub description: String,
    pub metadata: Value,
    pub ip_address: Option<String>,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub time_remaining: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationOutcome {
    pub violation: ViolationReceipt,
    pub violation_count: i64,
    pub max_violations: i64,
    /// True only for the call whose violation ended the attempt. An attempt
    /// that had already run out of time is closed as `TIME_EXPIRED` instead.
    pub auto_submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionSummary>,
}

/// Violation ledger and the auto-submit trigger built on it.
pub struct ProctorService {
    exams: Arc<dyn ExamDirectory>,
    violations: Arc<dyn ViolationStore>,
    attempts: Arc<AttemptService>,
}

impl ProctorService {
    pub fn new(
        exams: Arc<dyn ExamDirectory>,
        violations: Arc<dyn ViolationStore>,
        attempts: Arc<AttemptService>,
    ) -> Self {
        Self {
            exams,
            violations,
            attempts,
        }
    }

    /// Appends the violation, then auto-submits the attempt once the
    /// cumulative count reaches the exam's limit.
    pub async fn record_violation(
        &self,
        report: ViolationReport,
    ) -> Result<ViolationOutcome, AppError> {
        let exam = self
            .exams
            .find_exam(report.exam_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;

        let key = AttemptKey {
            exam_id: report.exam_id,
            student_id: report.student_id,
        };

        let violation = self
            .violations
            .append_violation(NewViolation {
                exam_id: report.exam_id,
                student_id: report.student_id,
                violation_type: report.violation_type,
                severity: report
                    .severity
                    .unwrap_or_else(|| report.violation_type.default_severity()),
                description: sanitize_description(&report.description),
                metadata: merge_metadata(report.metadata, report.user_agent),
                ip_address: report.ip_address,
                session_id: report.session_id,
                occurred_at: Utc::now(),
            })
            .await?;

        let violation_count = self.violations.count_violations(key).await?;

        tracing::info!(
            exam_id = report.exam_id,
            student_id = report.student_id,
            violation_type = violation.violation_type.as_str(),
            violation_count,
            "Violation recorded"
        );

        let submission = if violation_count >= exam.max_violations {
            self.auto_submit(key, violation_count, report.time_remaining).await?
        } else {
            None
        };

        Ok(ViolationOutcome {
            violation: violation.receipt(),
            violation_count,
            max_violations: exam.max_violations,
            auto_submitted: submission.as_ref().is_some_and(|summary| {
                summary.auto_submit_reason == Some(AutoSubmitReason::ViolationLimit)
            }),
            submission,
        })
    }

    /// Submits the attempt with its stored answers if it is still in
    /// progress. Losing a race to another submit is not an error.
    async fn auto_submit(
        &self,
        key: AttemptKey,
        violation_count: i64,
        time_remaining: Option<i64>,
    ) -> Result<Option<SubmissionSummary>, AppError> {
        let in_progress = self
            .attempts
            .find(key)
            .await?
            .is_some_and(|attempt| !attempt.status.is_terminal());

        if !in_progress {
            return Ok(None);
        }

        tracing::warn!(
            exam_id = key.exam_id,
            student_id = key.student_id,
            violation_count,
            "Violation limit reached, auto-submitting"
        );

        let cmd = SubmitCommand {
            exam_id: key.exam_id,
            student_id: key.student_id,
            answers: Vec::new(),
            time_remaining,
            violations_count: Some(violation_count),
            auto_submit: Some(AutoSubmitReason::ViolationLimit),
        };

        match self.attempts.submit(cmd).await {
            Ok(summary) => Ok(Some(summary)),
            Err(AppError::AlreadySubmitted) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Newest first, scoped to what `actor` may see.
    pub async fn list_violations(
        &self,
        actor: Actor,
        exam_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Violation>, AppError> {
        let mut filter = self.scope(actor, exam_id).await?;
        filter.limit = Some(limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT));

        self.violations.list_violations(&filter).await
    }

    /// Counts by type and severity. Staff only.
    pub async fn stats(
        &self,
        actor: Actor,
        exam_id: Option<i64>,
    ) -> Result<ViolationStats, AppError> {
        if !actor.role.is_staff() {
            return Err(AppError::Forbidden("Access denied.".to_string()));
        }

        let filter = self.scope(actor, exam_id).await?;
        let rows = self.violations.violation_breakdown(&filter).await?;

        Ok(ViolationStats::from_rows(&rows))
    }

    /// Students see their own rows, instructors rows on exams they own,
    /// admins everything.
    async fn scope(&self, actor: Actor, exam_id: Option<i64>) -> Result<ViolationFilter, AppError> {
        let filter = match actor.role {
            Role::Student => ViolationFilter {
                student_id: Some(actor.user_id),
                exam_ids: exam_id.map(|id| vec![id]),
                limit: None,
            },
            Role::Instructor => {
                let owned = self.exams.exam_ids_for_instructor(actor.user_id).await?;
                let exam_ids = match exam_id {
                    Some(id) if owned.contains(&id) => vec![id],
                    Some(_) => {
                        return Err(AppError::Forbidden(
                            "You can only view violations for your own exams.".to_string(),
                        ));
                    }
                    None => owned,
                };
                ViolationFilter {
                    student_id: None,
                    exam_ids: Some(exam_ids),
                    limit: None,
                }
            }
            Role::Admin => ViolationFilter {
                student_id: None,
                exam_ids: exam_id.map(|id| vec![id]),
                limit: None,
            },
        };

        Ok(filter)
    }
}

/// Folds the request's user agent into the client metadata object.
/// Non-object metadata is kept under `"value"`.
fn merge_metadata(metadata: Value, user_agent: Option<String>) -> Value {
    let mut map = match metadata {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => Map::from_iter([("value".to_string(), other)]),
    };

    if let Some(agent) = user_agent {
        map.insert("userAgent".to_string(), Value::String(agent));
    }

    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_gets_user_agent() {
        let merged = merge_metadata(json!({"key": "Alt+Tab"}), Some("Firefox".to_string()));
        assert_eq!(merged, json!({"key": "Alt+Tab", "userAgent": "Firefox"}));
    }

    #[test]
    fn non_object_metadata_is_wrapped() {
        assert_eq!(merge_metadata(Value::Null, None), json!({}));
        assert_eq!(merge_metadata(json!(3), None), json!({"value": 3}));
    }
}
