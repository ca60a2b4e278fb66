// src/services/scoring.rs

//! Pure scoring: exam questions plus a merged answer set in, correctness and
//! percentage out.

use crate::models::{
    attempt::{AnswerInput, AnswerRecord},
    exam::Question,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// One slot per question, ordered by question index.
    pub answers: Vec<AnswerRecord>,
    pub correct_answers: i64,
    pub total_questions: i64,
    pub percentage: f64,
}

/// Merges `provided` over `existing` by question index and scores the result.
///
/// Later entries win over earlier ones for the same index. Indices outside
/// `[0, questions.len())` are dropped. Questions nobody answered stay unanswered.
pub fn evaluate(
    questions: &[Question],
    existing: &[AnswerRecord],
    provided: &[AnswerInput],
) -> Evaluation {
    let total = questions.len();
    let mut slots: Vec<Option<AnswerInput>> = vec![None; total];

    let merged = existing.iter().map(AnswerInput::from).chain(provided.iter().cloned());
    for answer in merged {
        if let Some(slot) = usize::try_from(answer.question_index)
            .ok()
            .and_then(|index| slots.get_mut(index))
        {
            *slot = Some(answer);
        }
    }

    let answers: Vec<AnswerRecord> = slots
        .into_iter()
        .zip(questions)
        .enumerate()
        .map(|(index, (slot, question))| {
            let selected_option = slot.as_ref().and_then(|a| a.selected_option);
            AnswerRecord {
                question_index: index as i64,
                selected_option,
                time_spent: slot.map_or(0, |a| a.time_spent),
                is_correct: is_correct(question, selected_option),
            }
        })
        .collect();

    let correct_answers = answers.iter().filter(|a| a.is_correct).count() as i64;
    let total_questions = total as i64;

    Evaluation {
        answers,
        correct_answers,
        total_questions,
        percentage: percentage(correct_answers, total_questions),
    }
}

/// A selection outside the option range is never correct.
pub fn is_correct(question: &Question, selected_option: Option<i64>) -> bool {
    match selected_option {
        Some(selected) => {
            selected >= 0
                && (selected as usize) < question.options.len()
                && selected == question.correct_option_index
        }
        None => false,
    }
}

/// `correct / total * 100`, rounded to two decimals. Zero questions score zero.
pub fn percentage(correct: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let raw = correct as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

pub fn is_passing(percentage: f64, passing_percentage: f64) -> bool {
    percentage >= passing_percentage
}

pub fn grade(percentage: f64) -> char {
    match percentage {
        p if p >= 90.0 => 'A',
        p if p >= 80.0 => 'B',
        p if p >= 70.0 => 'C',
        p if p >= 60.0 => 'D',
        _ => 'F',
    }
}
