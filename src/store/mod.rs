// src/store/mod.rs

//! Persistence seams.
//!
//! Services depend only on these traits and receive implementations as
//! `Arc<dyn Trait>`. [`memory::MemoryStore`] backs tests and embedding,
//! [`postgres::PgStore`] backs the server.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, AttemptKey, Finalization, NewAttempt, ProgressUpdate},
        exam::Exam,
        session::{NewSession, RevokedToken, Session},
        user::{ExternalIdentity, NewUser, User},
        violation::{BreakdownRow, NewViolation, Violation, ViolationFilter},
    },
};

/// Read-only view of exams owned by the authoring subsystem.
#[async_trait]
pub trait ExamDirectory: Send + Sync {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError>;

    async fn exam_ids_for_instructor(&self, instructor_id: i64) -> Result<Vec<i64>, AppError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: i64) -> Result<Option<User>, AppError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, AppError>;

    /// Finds the user by provider subject, else links the account with the
    /// same email, else creates a new student.
    async fn upsert_external_user(&self, identity: &ExternalIdentity) -> Result<User, AppError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    async fn find_attempt(&self, key: AttemptKey) -> Result<Option<Attempt>, AppError>;

    /// Inserts unless a row for the key exists; returns the stored row either way.
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<Attempt, AppError>;

    /// Applies `update` only while the attempt is IN_PROGRESS.
    /// Returns `false` if the attempt is missing or terminal.
    async fn save_progress(
        &self,
        key: AttemptKey,
        update: ProgressUpdate,
    ) -> Result<bool, AppError>;

    /// Moves an IN_PROGRESS attempt to a terminal state in one conditional write.
    /// Returns `false` if another writer got there first.
    async fn finalize_attempt(&self, key: AttemptKey, fin: Finalization) -> Result<bool, AppError>;
}

#[async_trait]
pub trait ViolationStore: Send + Sync {
    async fn append_violation(&self, violation: NewViolation) -> Result<Violation, AppError>;

    async fn count_violations(&self, key: AttemptKey) -> Result<i64, AppError>;

    /// Newest first.
    async fn list_violations(&self, filter: &ViolationFilter) -> Result<Vec<Violation>, AppError>;

    async fn violation_breakdown(
        &self,
        filter: &ViolationFilter,
    ) -> Result<Vec<BreakdownRow>, AppError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Deactivates every active session of the user and inserts `session` as
    /// the only active one, as a single unit.
    async fn open_exclusive_session(&self, session: NewSession) -> Result<Session, AppError>;

    async fn find_active_session(
        &self,
        refresh_token_id: &str,
    ) -> Result<Option<Session>, AppError>;

    /// Rebinds an active session from `old_token_id` to `new_token_id`.
    /// Returns `false` if the session is inactive or no longer holds `old_token_id`.
    async fn rotate_session(
        &self,
        session_id: i64,
        old_token_id: &str,
        new_token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn deactivate_session_by_token(&self, refresh_token_id: &str) -> Result<bool, AppError>;

    async fn deactivate_session(&self, session_id: i64) -> Result<bool, AppError>;

    async fn find_user_session(
        &self,
        session_id: i64,
        user_id: i64,
    ) -> Result<Option<Session>, AppError>;

    /// Most recently used first.
    async fn list_active_sessions(&self, user_id: i64) -> Result<Vec<Session>, AppError>;

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
pub trait RevocationList: Send + Sync {
    /// Inserts unless the token id is already listed.
    /// Returns `false` when it was, which callers treat as "already revoked".
    async fn revoke(&self, entry: RevokedToken) -> Result<bool, AppError>;

    async fn is_revoked(&self, token_id: &str) -> Result<bool, AppError>;

    async fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Everything a complete backend provides.
pub trait Store:
    ExamDirectory
    + UserDirectory
    + AttemptRepository
    + ViolationStore
    + SessionStore
    + RevocationList
{
}

impl<T> Store for T where
    T: ExamDirectory
        + UserDirectory
        + AttemptRepository
        + ViolationStore
        + SessionStore
        + RevocationList
{
}
