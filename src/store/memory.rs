// src/store/memory.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    AttemptRepository, ExamDirectory, RevocationList, SessionStore, UserDirectory, ViolationStore,
};
use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, AttemptKey, AttemptStatus, Finalization, NewAttempt, ProgressUpdate},
        exam::Exam,
        session::{NewSession, RevokedToken, Session},
        user::{ExternalIdentity, NewUser, Role, User},
        violation::{BreakdownRow, NewViolation, Violation, ViolationFilter},
    },
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    exams: HashMap<i64, Exam>,
    users: HashMap<i64, User>,
    attempts: HashMap<AttemptKey, Attempt>,
    violations: Vec<Violation>,
    sessions: HashMap<i64, Session>,
    revoked: HashMap<String, RevokedToken>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_user(&mut self, user: NewUser) -> User {
        let id = self.next_id();
        let user = User {
            id,
            name: user.name,
            email: user.email,
            password: user.password,
            role: user.role,
            is_active: true,
            external_id: user.external_id,
            created_at: Utc::now(),
        };
        self.users.insert(id, user.clone());
        user
    }
}

/// Process-local store. Every operation runs under one lock, so the
/// conditional writes are trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an exam, as the authoring subsystem would.
    pub async fn insert_exam(&self, exam: Exam) {
        self.tables.lock().await.exams.insert(exam.id, exam);
    }

    /// Flips a user's `is_active` flag, as an admin would.
    pub async fn set_user_active(&self, user_id: i64, active: bool) -> bool {
        match self.tables.lock().await.users.get_mut(&user_id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ExamDirectory for MemoryStore {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        Ok(self.tables.lock().await.exams.get(&exam_id).cloned())
    }

    async fn exam_ids_for_instructor(&self, instructor_id: i64) -> Result<Vec<i64>, AppError> {
        let tables = self.tables.lock().await;
        let mut ids: Vec<i64> = tables
            .exams
            .values()
            .filter(|e| e.instructor_id == Some(instructor_id))
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, user_id: i64) -> Result<Option<User>, AppError> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, AppError> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict(format!(
                "Email '{}' already registered",
                user.email
            )));
        }
        Ok(tables.insert_user(user))
    }

    async fn upsert_external_user(&self, identity: &ExternalIdentity) -> Result<User, AppError> {
        let mut tables = self.tables.lock().await;

        if let Some(user) = tables
            .users
            .values_mut()
            .find(|u| u.external_id.as_deref() == Some(identity.subject.as_str()))
        {
            if !identity.name.is_empty() {
                user.name = identity.name.clone();
            }
            return Ok(user.clone());
        }

        if let Some(user) = tables.users.values_mut().find(|u| u.email == identity.email) {
            user.external_id = Some(identity.subject.clone());
            return Ok(user.clone());
        }

        Ok(tables.insert_user(NewUser {
            name: identity.name.clone(),
            email: identity.email.clone(),
            password: None,
            role: Role::Student,
            external_id: Some(identity.subject.clone()),
        }))
    }
}

#[async_trait]
impl AttemptRepository for MemoryStore {
    async fn find_attempt(&self, key: AttemptKey) -> Result<Option<Attempt>, AppError> {
        Ok(self.tables.lock().await.attempts.get(&key).cloned())
    }

    async fn create_attempt(&self, attempt: NewAttempt) -> Result<Attempt, AppError> {
        let mut tables = self.tables.lock().await;
        let key = AttemptKey {
            exam_id: attempt.exam_id,
            student_id: attempt.student_id,
        };
        if let Some(existing) = tables.attempts.get(&key) {
            return Ok(existing.clone());
        }

        let id = tables.next_id();
        let row = Attempt {
            id,
            exam_id: attempt.exam_id,
            student_id: attempt.student_id,
            status: AttemptStatus::InProgress,
            answers: Vec::new(),
            correct_answers: 0,
            total_questions: attempt.total_questions,
            percentage: 0.0,
            started_at: attempt.started_at,
            submitted_at: None,
            last_saved_at: attempt.started_at,
            time_remaining: attempt.time_remaining,
            duration_used: 0,
            violations_count: 0,
            auto_submitted: false,
            auto_submit_reason: None,
        };
        tables.attempts.insert(key, row.clone());
        Ok(row)
    }

    async fn save_progress(
        &self,
        key: AttemptKey,
        update: ProgressUpdate,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(attempt) = tables
            .attempts
            .get_mut(&key)
            .filter(|a| a.status == AttemptStatus::InProgress)
        else {
            return Ok(false);
        };

        attempt.answers = update.answers;
        attempt.correct_answers = update.correct_answers;
        attempt.total_questions = update.total_questions;
        attempt.percentage = update.percentage;
        attempt.time_remaining = update.time_remaining;
        attempt.last_saved_at = update.last_saved_at;
        Ok(true)
    }

    async fn finalize_attempt(&self, key: AttemptKey, fin: Finalization) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(attempt) = tables
            .attempts
            .get_mut(&key)
            .filter(|a| a.status == AttemptStatus::InProgress)
        else {
            return Ok(false);
        };

        attempt.status = fin.status;
        attempt.answers = fin.answers;
        attempt.correct_answers = fin.correct_answers;
        attempt.total_questions = fin.total_questions;
        attempt.percentage = fin.percentage;
        attempt.submitted_at = Some(fin.submitted_at);
        attempt.last_saved_at = fin.submitted_at;
        attempt.time_remaining = fin.time_remaining;
        attempt.duration_used = fin.duration_used;
        attempt.violations_count = fin.violations_count;
        attempt.auto_submitted = fin.auto_submit_reason.is_some();
        attempt.auto_submit_reason = fin.auto_submit_reason;
        Ok(true)
    }
}

#[async_trait]
impl ViolationStore for MemoryStore {
    async fn append_violation(&self, violation: NewViolation) -> Result<Violation, AppError> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let row = Violation {
            id,
            exam_id: violation.exam_id,
            student_id: violation.student_id,
            violation_type: violation.violation_type,
            severity: violation.severity,
            description: violation.description,
            metadata: violation.metadata,
            ip_address: violation.ip_address,
            session_id: violation.session_id,
            occurred_at: violation.occurred_at,
        };
        tables.violations.push(row.clone());
        Ok(row)
    }

    async fn count_violations(&self, key: AttemptKey) -> Result<i64, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .violations
            .iter()
            .filter(|v| v.exam_id == key.exam_id && v.student_id == key.student_id)
            .count() as i64)
    }

    async fn list_violations(&self, filter: &ViolationFilter) -> Result<Vec<Violation>, AppError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Violation> = tables
            .violations
            .iter()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn violation_breakdown(
        &self,
        filter: &ViolationFilter,
    ) -> Result<Vec<BreakdownRow>, AppError> {
        let tables = self.tables.lock().await;
        let mut counts = HashMap::new();
        for v in tables.violations.iter().filter(|v| filter.matches(v)) {
            *counts.entry((v.violation_type, v.severity)).or_insert(0i64) += 1;
        }
        let mut rows: Vec<BreakdownRow> = counts
            .into_iter()
            .map(|((violation_type, severity), count)| BreakdownRow {
                violation_type,
                severity,
                count,
            })
            .collect();
        rows.sort_by_key(|r| (r.violation_type.as_str(), r.severity.as_str()));
        Ok(rows)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn open_exclusive_session(&self, session: NewSession) -> Result<Session, AppError> {
        let mut tables = self.tables.lock().await;
        for existing in tables.sessions.values_mut() {
            if existing.user_id == session.user_id {
                existing.is_active = false;
            }
        }

        let now = Utc::now();
        let id = tables.next_id();
        let row = Session {
            id,
            user_id: session.user_id,
            refresh_token_id: session.refresh_token_id,
            device_info: session.device_info,
            last_activity: now,
            expires_at: session.expires_at,
            is_active: true,
            created_at: now,
        };
        tables.sessions.insert(id, row.clone());
        Ok(row)
    }

    async fn find_active_session(
        &self,
        refresh_token_id: &str,
    ) -> Result<Option<Session>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .find(|s| s.is_active && s.refresh_token_id == refresh_token_id)
            .cloned())
    }

    async fn rotate_session(
        &self,
        session_id: i64,
        old_token_id: &str,
        new_token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(&session_id) {
            Some(s) if s.is_active && s.refresh_token_id == old_token_id => {
                s.refresh_token_id = new_token_id.to_string();
                s.expires_at = expires_at;
                s.last_activity = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_session_by_token(&self, refresh_token_id: &str) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let mut changed = false;
        for s in tables
            .sessions
            .values_mut()
            .filter(|s| s.is_active && s.refresh_token_id == refresh_token_id)
        {
            s.is_active = false;
            changed = true;
        }
        Ok(changed)
    }

    async fn deactivate_session(&self, session_id: i64) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(&session_id) {
            Some(s) if s.is_active => {
                s.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_user_session(
        &self,
        session_id: i64,
        user_id: i64,
    ) -> Result<Option<Session>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .get(&session_id)
            .filter(|s| s.user_id == user_id)
            .cloned())
    }

    async fn list_active_sessions(&self, user_id: i64) -> Result<Vec<Session>, AppError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(rows)
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.expires_at > now);
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl RevocationList for MemoryStore {
    async fn revoke(&self, entry: RevokedToken) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        if tables.revoked.contains_key(&entry.token_id) {
            return Ok(false);
        }
        tables.revoked.insert(entry.token_id.clone(), entry);
        Ok(true)
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, AppError> {
        Ok(self.tables.lock().await.revoked.contains_key(token_id))
    }

    async fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        let before = tables.revoked.len();
        tables.revoked.retain(|_, r| r.expires_at > now);
        Ok((before - tables.revoked.len()) as u64)
    }
}
