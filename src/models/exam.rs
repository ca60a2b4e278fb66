// src/models/exam.rs

use serde::{Deserialize, Serialize};

/// One multiple-choice question as stored with its exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub prompt: String,

    /// Between 2 and 6 options, enforced by the authoring side.
    pub options: Vec<String>,

    /// Index into `options`. Never sent to students.
    pub correct_option_index: i64,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default = "default_difficulty")]
    pub difficulty: String,

    #[serde(default)]
    pub explanation: String,
}

fn default_category() -> String {
    "General".to_string()
}

fn default_difficulty() -> String {
    "Medium".to_string()
}

/// Exam definition, read-only to this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: i64,
    pub title: String,
    /// Owning instructor, if any.
    pub instructor_id: Option<i64>,
    /// Duration in minutes.
    pub duration: i64,
    pub max_violations: i64,
    pub passing_percentage: f64,
    pub is_active: bool,
    pub questions: Vec<Question>,
}

impl Exam {
    pub fn duration_seconds(&self) -> i64 {
        self.duration * 60
    }

    pub fn total_questions(&self) -> i64 {
        self.questions.len() as i64
    }

    /// Questions with the answer key stripped, indexed by position.
    pub fn public_questions(&self) -> Vec<PublicQuestion> {
        self.questions
            .iter()
            .enumerate()
            .map(|(index, q)| PublicQuestion {
                question_index: index as i64,
                prompt: q.prompt.clone(),
                options: q.options.clone(),
                category: q.category.clone(),
                difficulty: q.difficulty.clone(),
            })
            .collect()
    }

    pub fn overview(&self) -> ExamOverview {
        ExamOverview {
            id: self.id,
            title: self.title.clone(),
            duration: self.duration,
            max_violations: self.max_violations,
            passing_percentage: self.passing_percentage,
            total_questions: self.total_questions(),
        }
    }
}

/// DTO for sending a question to a student (excludes the answer key).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub question_index: i64,
    pub prompt: String,
    pub options: Vec<String>,
    pub category: String,
    pub difficulty: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamOverview {
    pub id: i64,
    pub title: String,
    pub duration: i64,
    pub max_violations: i64,
    pub passing_percentage: f64,
    pub total_questions: i64,
}
