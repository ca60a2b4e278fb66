// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, types::Json};

use super::{
    AttemptRepository, ExamDirectory, RevocationList, SessionStore, UserDirectory, ViolationStore,
};
use crate::{
    error::AppError,
    models::{
        attempt::{AnswerRecord, Attempt, AttemptKey, Finalization, NewAttempt, ProgressUpdate},
        exam::{Exam, Question},
        session::{DeviceInfo, NewSession, RevokedToken, Session},
        user::{ExternalIdentity, NewUser, Role, User},
        violation::{BreakdownRow, NewViolation, Violation, ViolationFilter},
    },
};

/// Postgres-backed store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn corrupt(what: &str, err: String) -> AppError {
    AppError::InternalServerError(format!("corrupt {what} row: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    password: Option<String>,
    role: String,
    is_active: bool,
    external_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password: row.password,
            role: row.role.parse().map_err(|e| corrupt("user", e))?,
            is_active: row.is_active,
            external_id: row.external_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ExamRow {
    id: i64,
    title: String,
    instructor_id: Option<i64>,
    duration: i64,
    max_violations: i64,
    passing_percentage: f64,
    is_active: bool,
    questions: Json<Vec<Question>>,
}

impl From<ExamRow> for Exam {
    fn from(row: ExamRow) -> Self {
        Exam {
            id: row.id,
            title: row.title,
            instructor_id: row.instructor_id,
            duration: row.duration,
            max_violations: row.max_violations,
            passing_percentage: row.passing_percentage,
            is_active: row.is_active,
            questions: row.questions.0,
        }
    }
}

#[derive(FromRow)]
struct AttemptRow {
    id: i64,
    exam_id: i64,
    student_id: i64,
    status: String,
    answers: Json<Vec<AnswerRecord>>,
    correct_answers: i64,
    total_questions: i64,
    percentage: f64,
    started_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    last_saved_at: DateTime<Utc>,
    time_remaining: i64,
    duration_used: i64,
    violations_count: i64,
    auto_submitted: bool,
    auto_submit_reason: Option<String>,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = AppError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(Attempt {
            id: row.id,
            exam_id: row.exam_id,
            student_id: row.student_id,
            status: row.status.parse().map_err(|e| corrupt("attempt", e))?,
            answers: row.answers.0,
            correct_answers: row.correct_answers,
            total_questions: row.total_questions,
            percentage: row.percentage,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            last_saved_at: row.last_saved_at,
            time_remaining: row.time_remaining,
            duration_used: row.duration_used,
            violations_count: row.violations_count,
            auto_submitted: row.auto_submitted,
            auto_submit_reason: row
                .auto_submit_reason
                .map(|r| r.parse())
                .transpose()
                .map_err(|e| corrupt("attempt", e))?,
        })
    }
}

#[derive(FromRow)]
struct ViolationRow {
    id: i64,
    exam_id: i64,
    student_id: i64,
    violation_type: String,
    severity: String,
    description: String,
    metadata: Value,
    ip_address: Option<String>,
    session_id: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<ViolationRow> for Violation {
    type Error = AppError;

    fn try_from(row: ViolationRow) -> Result<Self, Self::Error> {
        Ok(Violation {
            id: row.id,
            exam_id: row.exam_id,
            student_id: row.student_id,
            violation_type: row.violation_type.parse().map_err(|e| corrupt("violation", e))?,
            severity: row.severity.parse().map_err(|e| corrupt("violation", e))?,
            description: row.description,
            metadata: row.metadata,
            ip_address: row.ip_address,
            session_id: row.session_id,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: i64,
    user_id: i64,
    refresh_token_id: String,
    device_info: Json<DeviceInfo>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            refresh_token_id: row.refresh_token_id,
            device_info: row.device_info.0,
            last_activity: row.last_activity,
            expires_at: row.expires_at,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Exams
// ---------------------------------------------------------------------------

#[async_trait]
impl ExamDirectory for PgStore {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        let row = sqlx::query_as::<_, ExamRow>(
            r#"
            SELECT id, title, instructor_id, duration, max_violations,
                   passing_percentage, is_active, questions
            FROM exams
            WHERE id = $1
            "#,
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Exam::from))
    }

    async fn exam_ids_for_instructor(&self, instructor_id: i64) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM exams WHERE instructor_id = $1 ORDER BY id",
        )
        .bind(instructor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, user_id: i64) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, password, role, is_active, external_id, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, password, role, is_active, external_id, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn create_user(&self, user: NewUser) -> Result<User, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (name, email, password, role, external_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, email, password, role, is_active, external_id, created_at
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password)
        .bind(user.role.as_str())
        .bind(&user.external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Email '{}' already registered", user.email))
            } else {
                tracing::error!("Failed to create user: {:?}", e);
                AppError::from(e)
            }
        })?;

        User::try_from(row)
    }

    async fn upsert_external_user(&self, identity: &ExternalIdentity) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;

        let linked = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
            SET name = CASE WHEN $2 = '' THEN name ELSE $2 END
            WHERE external_id = $1
            RETURNING id, name, email, password, role, is_active, external_id, created_at
            "#,
        )
        .bind(&identity.subject)
        .bind(&identity.name)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match linked {
            Some(row) => row,
            None => {
                let by_email = sqlx::query_as::<_, UserRow>(
                    r#"
                    UPDATE users
                    SET external_id = $1
                    WHERE email = $2
                    RETURNING id, name, email, password, role, is_active, external_id, created_at
                    "#,
                )
                .bind(&identity.subject)
                .bind(&identity.email)
                .fetch_optional(&mut *tx)
                .await?;

                match by_email {
                    Some(row) => row,
                    None => {
                        sqlx::query_as::<_, UserRow>(
                            r#"
                            INSERT INTO users (name, email, password, role, external_id)
                            VALUES ($1, $2, NULL, $3, $4)
                            RETURNING id, name, email, password, role, is_active,
                                      external_id, created_at
                            "#,
                        )
                        .bind(&identity.name)
                        .bind(&identity.email)
                        .bind(Role::Student.as_str())
                        .bind(&identity.subject)
                        .fetch_one(&mut *tx)
                        .await?
                    }
                }
            }
        };

        tx.commit().await?;
        User::try_from(row)
    }
}

// ---------------------------------------------------------------------------
// Attempts
// ---------------------------------------------------------------------------

#[async_trait]
impl AttemptRepository for PgStore {
    async fn find_attempt(&self, key: AttemptKey) -> Result<Option<Attempt>, AppError> {
        sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT id, exam_id, student_id, status, answers, correct_answers, total_questions,
                   percentage, started_at, submitted_at, last_saved_at, time_remaining,
                   duration_used, violations_count, auto_submitted, auto_submit_reason
            FROM attempts
            WHERE exam_id = $1 AND student_id = $2
            "#,
        )
        .bind(key.exam_id)
        .bind(key.student_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Attempt::try_from)
        .transpose()
    }

    async fn create_attempt(&self, attempt: NewAttempt) -> Result<Attempt, AppError> {
        sqlx::query(
            r#"
            INSERT INTO attempts (exam_id, student_id, total_questions, time_remaining,
                                  started_at, last_saved_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (exam_id, student_id) DO NOTHING
            "#,
        )
        .bind(attempt.exam_id)
        .bind(attempt.student_id)
        .bind(attempt.total_questions)
        .bind(attempt.time_remaining)
        .bind(attempt.started_at)
        .execute(&self.pool)
        .await?;

        let key = AttemptKey {
            exam_id: attempt.exam_id,
            student_id: attempt.student_id,
        };
        self.find_attempt(key)
            .await?
            .ok_or_else(|| {
                AppError::InternalServerError("attempt vanished after insert".to_string())
            })
    }

    async fn save_progress(
        &self,
        key: AttemptKey,
        update: ProgressUpdate,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE attempts
            SET answers = $3, correct_answers = $4, total_questions = $5,
                percentage = $6, time_remaining = $7, last_saved_at = $8
            WHERE exam_id = $1 AND student_id = $2 AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(key.exam_id)
        .bind(key.student_id)
        .bind(Json(&update.answers))
        .bind(update.correct_answers)
        .bind(update.total_questions)
        .bind(update.percentage)
        .bind(update.time_remaining)
        .bind(update.last_saved_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finalize_attempt(&self, key: AttemptKey, fin: Finalization) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE attempts
            SET status = $3, answers = $4, correct_answers = $5, total_questions = $6,
                percentage = $7, submitted_at = $8, last_saved_at = $8, time_remaining = $9,
                duration_used = $10, violations_count = $11, auto_submitted = $12,
                auto_submit_reason = $13
            WHERE exam_id = $1 AND student_id = $2 AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(key.exam_id)
        .bind(key.student_id)
        .bind(fin.status.as_str())
        .bind(Json(&fin.answers))
        .bind(fin.correct_answers)
        .bind(fin.total_questions)
        .bind(fin.percentage)
        .bind(fin.submitted_at)
        .bind(fin.time_remaining)
        .bind(fin.duration_used)
        .bind(fin.violations_count)
        .bind(fin.auto_submit_reason.is_some())
        .bind(fin.auto_submit_reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[async_trait]
impl ViolationStore for PgStore {
    async fn append_violation(&self, violation: NewViolation) -> Result<Violation, AppError> {
        let row = sqlx::query_as::<_, ViolationRow>(
            r#"
            INSERT INTO violations (exam_id, student_id, violation_type, severity, description,
                                    metadata, ip_address, session_id, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, exam_id, student_id, violation_type, severity, description,
                      metadata, ip_address, session_id, occurred_at
            "#,
        )
        .bind(violation.exam_id)
        .bind(violation.student_id)
        .bind(violation.violation_type.as_str())
        .bind(violation.severity.as_str())
        .bind(&violation.description)
        .bind(&violation.metadata)
        .bind(&violation.ip_address)
        .bind(&violation.session_id)
        .bind(violation.occurred_at)
        .fetch_one(&self.pool)
        .await?;

        Violation::try_from(row)
    }

    async fn count_violations(&self, key: AttemptKey) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM violations WHERE exam_id = $1 AND student_id = $2",
        )
        .bind(key.exam_id)
        .bind(key.student_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_violations(&self, filter: &ViolationFilter) -> Result<Vec<Violation>, AppError> {
        let rows = sqlx::query_as::<_, ViolationRow>(
            r#"
            SELECT id, exam_id, student_id, violation_type, severity, description,
                   metadata, ip_address, session_id, occurred_at
            FROM violations
            WHERE ($1::BIGINT IS NULL OR student_id = $1)
              AND ($2::BIGINT[] IS NULL OR exam_id = ANY($2))
            ORDER BY occurred_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(filter.student_id)
        .bind(filter.exam_ids.as_deref())
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Violation::try_from).collect()
    }

    async fn violation_breakdown(
        &self,
        filter: &ViolationFilter,
    ) -> Result<Vec<BreakdownRow>, AppError> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            SELECT violation_type, severity, COUNT(*)
            FROM violations
            WHERE ($1::BIGINT IS NULL OR student_id = $1)
              AND ($2::BIGINT[] IS NULL OR exam_id = ANY($2))
            GROUP BY violation_type, severity
            ORDER BY violation_type, severity
            "#,
        )
        .bind(filter.student_id)
        .bind(filter.exam_ids.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(violation_type, severity, count)| {
                Ok(BreakdownRow {
                    violation_type: violation_type.parse().map_err(|e| corrupt("violation", e))?,
                    severity: severity.parse().map_err(|e| corrupt("violation", e))?,
                    count,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[async_trait]
impl SessionStore for PgStore {
    async fn open_exclusive_session(&self, session: NewSession) -> Result<Session, AppError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent logins of the same user.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(session.user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE sessions SET is_active = FALSE WHERE user_id = $1 AND is_active")
            .bind(session.user_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (user_id, refresh_token_id, device_info, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, refresh_token_id, device_info, last_activity,
                      expires_at, is_active, created_at
            "#,
        )
        .bind(session.user_id)
        .bind(&session.refresh_token_id)
        .bind(Json(&session.device_info))
        .bind(session.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn find_active_session(
        &self,
        refresh_token_id: &str,
    ) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, refresh_token_id, device_info, last_activity,
                   expires_at, is_active, created_at
            FROM sessions
            WHERE refresh_token_id = $1 AND is_active
            "#,
        )
        .bind(refresh_token_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn rotate_session(
        &self,
        session_id: i64,
        old_token_id: &str,
        new_token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET refresh_token_id = $3, expires_at = $4, last_activity = NOW()
            WHERE id = $1 AND refresh_token_id = $2 AND is_active
            "#,
        )
        .bind(session_id)
        .bind(old_token_id)
        .bind(new_token_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn deactivate_session_by_token(&self, refresh_token_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE WHERE refresh_token_id = $1 AND is_active",
        )
        .bind(refresh_token_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_session(&self, session_id: i64) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = FALSE WHERE id = $1 AND is_active")
                .bind(session_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_user_session(
        &self,
        session_id: i64,
        user_id: i64,
    ) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, refresh_token_id, device_info, last_activity,
                   expires_at, is_active, created_at
            FROM sessions
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn list_active_sessions(&self, user_id: i64) -> Result<Vec<Session>, AppError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, refresh_token_id, device_info, last_activity,
                   expires_at, is_active, created_at
            FROM sessions
            WHERE user_id = $1 AND is_active
            ORDER BY last_activity DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Revocation list
// ---------------------------------------------------------------------------

#[async_trait]
impl RevocationList for PgStore {
    async fn revoke(&self, entry: RevokedToken) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_id, user_id, token_type, reason, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token_id) DO NOTHING
            "#,
        )
        .bind(&entry.token_id)
        .bind(entry.user_id)
        .bind(entry.token_type.as_str())
        .bind(entry.reason.as_str())
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, AppError> {
        let revoked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE token_id = $1)",
        )
        .bind(token_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(revoked)
    }

    async fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
