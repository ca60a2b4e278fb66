// src/services/attempt.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    error::AppError,
    models::{
        attempt::{
            AnswerInput, Attempt, AttemptKey, AttemptResult, AttemptStatus, AutoSubmitReason,
            Finalization, NewAttempt, ProgressUpdate, ProgressView, StartedAttempt,
            SubmissionSummary,
        },
        exam::Exam,
    },
    services::scoring::{self, Evaluation},
    store::{AttemptRepository, ExamDirectory},
};

/// A request to move an attempt to its terminal state.
#[derive(Debug, Clone)]
pub struct SubmitCommand {
    pub exam_id: i64,
    pub student_id: i64,
    pub answers: Vec<AnswerInput>,
    pub time_remaining: Option<i64>,
    pub violations_count: Option<i64>,
    /// `Some` when the system, not the student, ends the attempt.
    pub auto_submit: Option<AutoSubmitReason>,
}

impl SubmitCommand {
    pub fn key(&self) -> AttemptKey {
        AttemptKey {
            exam_id: self.exam_id,
            student_id: self.student_id,
        }
    }
}

/// Attempt state machine: start, save, submit.
///
/// `IN_PROGRESS` moves to `SUBMITTED` or `AUTO_SUBMITTED` and never back.
/// Every write goes through a repository call conditional on the attempt
/// still being `IN_PROGRESS`, so concurrent submits have exactly one winner.
pub struct AttemptService {
    exams: Arc<dyn ExamDirectory>,
    attempts: Arc<dyn AttemptRepository>,
    grace: Duration,
}

impl AttemptService {
    pub fn new(
        exams: Arc<dyn ExamDirectory>,
        attempts: Arc<dyn AttemptRepository>,
        grace_secs: u64,
    ) -> Self {
        Self {
            exams,
            attempts,
            grace: Duration::seconds(grace_secs as i64),
        }
    }

    async fn load_exam(&self, exam_id: i64) -> Result<Exam, AppError> {
        self.exams
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
    }

    pub async fn find(&self, key: AttemptKey) -> Result<Option<Attempt>, AppError> {
        self.attempts.find_attempt(key).await
    }

    /// Creates the attempt or resumes the one in progress.
    pub async fn start(&self, exam_id: i64, student_id: i64) -> Result<StartedAttempt, AppError> {
        let exam = self.load_exam(exam_id).await?;
        if !exam.is_active {
            return Err(AppError::Forbidden("Exam is not available.".to_string()));
        }

        let attempt = self.open(&exam, student_id).await?;

        tracing::info!(exam_id, student_id, attempt_id = attempt.id, "Attempt started");

        Ok(StartedAttempt {
            exam: exam.overview(),
            questions: exam.public_questions(),
            progress: attempt.progress(),
        })
    }

    /// Merges answers into the attempt and rescores it. Returns the stored
    /// time remaining.
    pub async fn save_progress(
        &self,
        exam_id: i64,
        student_id: i64,
        answers: &[AnswerInput],
        time_remaining: Option<i64>,
    ) -> Result<i64, AppError> {
        let exam = match self.exams.find_exam(exam_id).await? {
            Some(exam) if exam.is_active => exam,
            _ => return Err(AppError::NotFound("Exam not available".to_string())),
        };

        let attempt = self.open(&exam, student_id).await?;

        let Evaluation {
            answers,
            correct_answers,
            total_questions,
            percentage,
        } = scoring::evaluate(&exam.questions, &attempt.answers, answers);

        let time_remaining = resolve_time_remaining(time_remaining, attempt.time_remaining, &exam);

        let update = ProgressUpdate {
            answers,
            correct_answers,
            total_questions,
            percentage,
            time_remaining,
            last_saved_at: Utc::now(),
        };

        if !self.attempts.save_progress(attempt.key(), update).await? {
            return Err(AppError::AlreadySubmitted);
        }

        Ok(time_remaining)
    }

    /// Finalizes an in-progress attempt.
    ///
    /// An attempt that ran past its deadline is finalized as `TIME_EXPIRED`
    /// using its stored answers, whatever the command carries.
    pub async fn submit(&self, cmd: SubmitCommand) -> Result<SubmissionSummary, AppError> {
        let exam = self.load_exam(cmd.exam_id).await?;

        let attempt = self
            .attempts
            .find_attempt(cmd.key())
            .await?
            .ok_or_else(|| AppError::NotFound("No attempt found for this exam".to_string()))?;

        if attempt.status.is_terminal() {
            return Err(AppError::AlreadySubmitted);
        }

        let now = Utc::now();
        if self.is_overdue(&exam, &attempt, now) {
            return self.expire(&exam, &attempt, now).await;
        }

        let evaluation = scoring::evaluate(&exam.questions, &attempt.answers, &cmd.answers);
        let time_remaining =
            resolve_time_remaining(cmd.time_remaining, attempt.time_remaining, &exam);
        let violations_count = cmd
            .violations_count
            .filter(|count| *count >= 0)
            .unwrap_or(attempt.violations_count);

        let summary = self
            .finalize(
                &exam,
                &attempt,
                evaluation,
                time_remaining,
                violations_count,
                cmd.auto_submit,
                now,
            )
            .await?;

        match cmd.auto_submit {
            Some(reason) => tracing::warn!(
                exam_id = cmd.exam_id,
                student_id = cmd.student_id,
                reason = reason.as_str(),
                "Attempt auto-submitted"
            ),
            None => tracing::info!(
                exam_id = cmd.exam_id,
                student_id = cmd.student_id,
                score = summary.percentage,
                "Attempt submitted"
            ),
        }

        Ok(summary)
    }

    /// Current answers and clock of the caller's attempt.
    pub async fn progress(&self, exam_id: i64, student_id: i64) -> Result<ProgressView, AppError> {
        let attempt = self.settled(exam_id, student_id).await?;
        Ok(attempt.progress())
    }

    /// Final report; only available once the attempt is terminal.
    pub async fn result(&self, exam_id: i64, student_id: i64) -> Result<AttemptResult, AppError> {
        let exam = self.load_exam(exam_id).await?;
        let attempt = self.settled(exam_id, student_id).await?;

        if !attempt.status.is_terminal() {
            return Err(AppError::NotFound("Results are not available yet".to_string()));
        }

        let time_taken = attempt
            .submitted_at
            .map_or(0, |at| (at - attempt.started_at).num_seconds().max(0));

        Ok(AttemptResult {
            exam_id: attempt.exam_id,
            status: attempt.status,
            passed: scoring::is_passing(attempt.percentage, exam.passing_percentage),
            grade: scoring::grade(attempt.percentage),
            correct_answers: attempt.correct_answers,
            total_questions: attempt.total_questions,
            percentage: attempt.percentage,
            time_taken,
            duration_used: attempt.duration_used,
            violations_count: attempt.violations_count,
            auto_submitted: attempt.auto_submitted,
            auto_submit_reason: attempt.auto_submit_reason,
            submitted_at: attempt.submitted_at,
            answers: attempt.answers,
        })
    }

    /// Loads or creates the in-progress attempt for `student_id`.
    /// Fails with `AlreadySubmitted` if it is terminal or just timed out.
    async fn open(&self, exam: &Exam, student_id: i64) -> Result<Attempt, AppError> {
        let key = AttemptKey {
            exam_id: exam.id,
            student_id,
        };

        let attempt = match self.attempts.find_attempt(key).await? {
            Some(attempt) => attempt,
            None => {
                self.attempts
                    .create_attempt(NewAttempt {
                        exam_id: exam.id,
                        student_id,
                        total_questions: exam.total_questions(),
                        time_remaining: exam.duration_seconds(),
                        started_at: Utc::now(),
                    })
                    .await?
            }
        };

        if attempt.status.is_terminal() {
            return Err(AppError::AlreadySubmitted);
        }

        let now = Utc::now();
        if self.is_overdue(exam, &attempt, now) {
            self.expire(exam, &attempt, now).await?;
            return Err(AppError::AlreadySubmitted);
        }

        Ok(attempt)
    }

    /// The attempt after applying any pending time expiry.
    async fn settled(&self, exam_id: i64, student_id: i64) -> Result<Attempt, AppError> {
        let key = AttemptKey { exam_id, student_id };
        let attempt = self
            .attempts
            .find_attempt(key)
            .await?
            .ok_or_else(|| AppError::NotFound("No attempt found for this exam".to_string()))?;

        if attempt.status.is_terminal() {
            return Ok(attempt);
        }

        let exam = self.load_exam(exam_id).await?;
        let now = Utc::now();
        if !self.is_overdue(&exam, &attempt, now) {
            return Ok(attempt);
        }

        match self.expire(&exam, &attempt, now).await {
            Ok(_) | Err(AppError::AlreadySubmitted) => {}
            Err(e) => return Err(e),
        }

        self.attempts
            .find_attempt(key)
            .await?
            .ok_or_else(|| AppError::NotFound("No attempt found for this exam".to_string()))
    }

    fn is_overdue(&self, exam: &Exam, attempt: &Attempt, now: DateTime<Utc>) -> bool {
        now > attempt.started_at + Duration::seconds(exam.duration_seconds()) + self.grace
    }

    /// Finalizes an overdue attempt with whatever was last saved.
    async fn expire(
        &self,
        exam: &Exam,
        attempt: &Attempt,
        now: DateTime<Utc>,
    ) -> Result<SubmissionSummary, AppError> {
        let evaluation = scoring::evaluate(&exam.questions, &attempt.answers, &[]);
        let summary = self
            .finalize(
                exam,
                attempt,
                evaluation,
                0,
                attempt.violations_count,
                Some(AutoSubmitReason::TimeExpired),
                now,
            )
            .await?;

        tracing::warn!(
            exam_id = attempt.exam_id,
            student_id = attempt.student_id,
            "Attempt auto-submitted after time expired"
        );

        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        exam: &Exam,
        attempt: &Attempt,
        evaluation: Evaluation,
        time_remaining: i64,
        violations_count: i64,
        reason: Option<AutoSubmitReason>,
        now: DateTime<Utc>,
    ) -> Result<SubmissionSummary, AppError> {
        let status = match reason {
            Some(_) => AttemptStatus::AutoSubmitted,
            None => AttemptStatus::Submitted,
        };

        let summary = SubmissionSummary {
            percentage: evaluation.percentage,
            correct_answers: evaluation.correct_answers,
            total_questions: evaluation.total_questions,
            passed: scoring::is_passing(evaluation.percentage, exam.passing_percentage),
            status,
            auto_submit_reason: reason,
        };

        let fin = Finalization {
            status,
            answers: evaluation.answers,
            correct_answers: evaluation.correct_answers,
            total_questions: evaluation.total_questions,
            percentage: evaluation.percentage,
            submitted_at: now,
            time_remaining,
            duration_used: (exam.duration_seconds() - time_remaining).max(0),
            violations_count,
            auto_submit_reason: reason,
        };

        if !self.attempts.finalize_attempt(attempt.key(), fin).await? {
            return Err(AppError::AlreadySubmitted);
        }

        Ok(summary)
    }
}

/// A supplied non-negative value replaces the stored one, capped at the exam
/// duration. Anything else keeps the stored value.
fn resolve_time_remaining(supplied: Option<i64>, stored: i64, exam: &Exam) -> i64 {
    supplied
        .filter(|t| *t >= 0)
        .unwrap_or(stored)
        .min(exam.duration_seconds())
}
