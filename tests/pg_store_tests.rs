// tests/pg_store_tests.rs
//
// Runs against a real Postgres. Set DATABASE_URL to enable; without it
// every test returns early.

use std::sync::Arc;

use chrono::{Duration, Utc};
use exam_sentinel::{
    config::Config,
    error::{AppError, AuthError},
    models::{
        attempt::{
            AttemptKey, AttemptStatus, AutoSubmitReason, Finalization, NewAttempt, ProgressUpdate,
        },
        exam::Question,
        session::DeviceInfo,
        user::{Actor, LoginRequest, NewUser, RegisterRequest, Role},
        violation::ViolationType,
    },
    services::proctor::ViolationReport,
    state::AppState,
    store::{AttemptRepository, SessionStore, UserDirectory, postgres::PgStore},
};
use serde_json::Value;
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};

fn test_config(database_url: &str) -> Config {
    Config {
        database_url: database_url.to_string(),
        jwt_secret: "pg_access_secret".to_string(),
        jwt_refresh_secret: "pg_refresh_secret".to_string(),
        access_token_ttl: 600,
        refresh_token_ttl: 7 * 24 * 3600,
        submission_grace: 30,
        purge_interval: 600,
        port: 0,
        cors_origins: vec![],
        admin_email: None,
        admin_password: None,
        rust_log: "error".to_string(),
    }
}

async fn spawn_store() -> Option<(AppState, Arc<PgStore>)> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let store = Arc::new(PgStore::new(pool));
    let state = AppState::new(test_config(&database_url), store.clone());
    Some((state, store))
}

fn unique_email(prefix: &str) -> String {
    format!("{prefix}_{}@example.com", &uuid::Uuid::new_v4().to_string()[..8])
}

async fn insert_user(store: &PgStore, role: Role) -> i64 {
    store
        .create_user(NewUser {
            name: format!("{role} user"),
            email: unique_email(role.as_str()),
            password: None,
            role,
            external_id: None,
        })
        .await
        .unwrap()
        .id
}

/// Two questions keyed 1 and 0, 30 minutes long.
async fn insert_exam(pool: &PgPool, instructor_id: Option<i64>, max_violations: i64) -> i64 {
    let question = |correct: i64| Question {
        prompt: format!("Pick {correct}"),
        options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
        correct_option_index: correct,
        category: "General".to_string(),
        difficulty: "Easy".to_string(),
        explanation: String::new(),
    };

    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO exams (title, instructor_id, duration, max_violations, questions)
        VALUES ('Postgres exam', $1, 30, $2, $3)
        RETURNING id
        "#,
    )
    .bind(instructor_id)
    .bind(max_violations)
    .bind(Json(vec![question(1), question(0)]))
    .fetch_one(pool)
    .await
    .unwrap()
}

fn finalization(status: AttemptStatus, reason: Option<AutoSubmitReason>) -> Finalization {
    Finalization {
        status,
        answers: Vec::new(),
        correct_answers: 0,
        total_questions: 2,
        percentage: 0.0,
        submitted_at: Utc::now(),
        time_remaining: 0,
        duration_used: 1800,
        violations_count: 0,
        auto_submit_reason: reason,
    }
}

fn report(exam_id: i64, student_id: i64, violation_type: ViolationType) -> ViolationReport {
    ViolationReport {
        exam_id,
        student_id,
        violation_type,
        severity: None,
        description: "left the window".to_string(),
        metadata: Value::Null,
        ip_address: Some("127.0.0.1".to_string()),
        session_id: None,
        user_agent: None,
        time_remaining: None,
    }
}

fn register_request(email: &str) -> RegisterRequest {
    RegisterRequest {
        name: "Pg Student".to_string(),
        email: email.to_string(),
        password: "password123".to_string(),
        role: None,
    }
}

#[tokio::test]
async fn finalize_only_applies_while_in_progress() {
    let Some((state, store)) = spawn_store().await else {
        return;
    };

    // Arrange
    let student = insert_user(&store, Role::Student).await;
    let exam_id = insert_exam(store.pool(), None, 3).await;
    let key = AttemptKey {
        exam_id,
        student_id: student,
    };

    let created = store
        .create_attempt(NewAttempt {
            exam_id,
            student_id: student,
            total_questions: 2,
            time_remaining: 1800,
            started_at: Utc::now(),
        })
        .await
        .unwrap();

    // Creating again returns the same row
    let again = store
        .create_attempt(NewAttempt {
            exam_id,
            student_id: student,
            total_questions: 2,
            time_remaining: 60,
            started_at: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(created.id, again.id);
    assert_eq!(again.time_remaining, 1800);

    // Act: finalize twice
    let first = store
        .finalize_attempt(key, finalization(AttemptStatus::Submitted, None))
        .await
        .unwrap();
    let second = store
        .finalize_attempt(
            key,
            finalization(AttemptStatus::AutoSubmitted, Some(AutoSubmitReason::ViolationLimit)),
        )
        .await
        .unwrap();

    // Assert
    assert!(first);
    assert!(!second);

    let saved = store
        .save_progress(
            key,
            ProgressUpdate {
                answers: Vec::new(),
                correct_answers: 2,
                total_questions: 2,
                percentage: 100.0,
                time_remaining: 10,
                last_saved_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    assert!(!saved);

    let stored = store.find_attempt(key).await.unwrap().unwrap();
    assert_eq!(stored.status, AttemptStatus::Submitted);
    assert_eq!(stored.auto_submit_reason, None);
    assert_eq!(stored.percentage, 0.0);

    let resumed = state.attempts.start(exam_id, student).await;
    assert!(matches!(resumed, Err(AppError::AlreadySubmitted)));
}

#[tokio::test]
async fn concurrent_submits_have_one_winner_on_postgres() {
    let Some((state, store)) = spawn_store().await else {
        return;
    };

    let student = insert_user(&store, Role::Student).await;
    let exam_id = insert_exam(store.pool(), None, 1).await;
    state.attempts.start(exam_id, student).await.unwrap();

    // A student submit races two violations that each reach the limit
    let submit = exam_sentinel::services::attempt::SubmitCommand {
        exam_id,
        student_id: student,
        answers: Vec::new(),
        time_remaining: Some(600),
        violations_count: None,
        auto_submit: None,
    };
    let (a, b, c) = tokio::join!(
        state.attempts.submit(submit),
        state.proctor.record_violation(report(exam_id, student, ViolationType::TabSwitch)),
        state.proctor.record_violation(report(exam_id, student, ViolationType::WindowBlur)),
    );

    let b = b.unwrap();
    let c = c.unwrap();
    let winners = [a.is_ok(), b.auto_submitted, c.auto_submitted]
        .iter()
        .filter(|won| **won)
        .count();
    assert_eq!(winners, 1);

    let result = state.attempts.result(exam_id, student).await.unwrap();
    assert!(result.status.is_terminal());
}

#[tokio::test]
async fn reused_refresh_token_is_revoked_on_postgres() {
    let Some((state, _)) = spawn_store().await else {
        return;
    };

    // Arrange
    let login = state
        .auth
        .register(register_request(&unique_email("rotate")), DeviceInfo::default())
        .await
        .unwrap();

    // Act: rotate once, then replay the old token
    let rotated = state.auth.refresh(&login.tokens.refresh_token).await.unwrap();
    let replay = state.auth.refresh(&login.tokens.refresh_token).await;

    // Assert
    assert!(matches!(replay, Err(AppError::Auth(AuthError::Revoked))));

    // Two concurrent refreshes with the same token: one rotates, one is revoked
    let (a, b) = tokio::join!(
        state.auth.refresh(&rotated.refresh_token),
        state.auth.refresh(&rotated.refresh_token),
    );
    let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(wins, 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(AppError::Auth(AuthError::Revoked))));

    let sessions = state.auth.list_sessions(login.user.id).await.unwrap();
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn second_login_leaves_one_active_session_on_postgres() {
    let Some((state, store)) = spawn_store().await else {
        return;
    };

    // Arrange
    let email = unique_email("devices");
    let first = state
        .auth
        .register(register_request(&email), DeviceInfo::default())
        .await
        .unwrap();
    let credentials = || LoginRequest {
        email: email.clone(),
        password: "password123".to_string(),
    };

    // Act: two devices log in at once
    let (a, b) = tokio::join!(
        state.auth.login(credentials(), DeviceInfo::default()),
        state.auth.login(credentials(), DeviceInfo::default()),
    );
    a.unwrap();
    b.unwrap();

    // Assert
    let active = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sessions WHERE user_id = $1 AND is_active",
    )
    .bind(first.user.id)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(active, 1);
    assert_eq!(store.list_active_sessions(first.user.id).await.unwrap().len(), 1);

    let stale = state.auth.refresh(&first.tokens.refresh_token).await;
    assert!(matches!(stale, Err(AppError::Auth(AuthError::NoActiveSession))));

    // The partial unique index rejects a second active row outright
    let duplicate = sqlx::query(
        "INSERT INTO sessions (user_id, refresh_token_id, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(first.user.id)
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(Utc::now() + Duration::days(7))
    .execute(store.pool())
    .await;
    let err = duplicate.unwrap_err();
    assert!(err.as_database_error().is_some_and(|db| db.is_unique_violation()));
}

#[tokio::test]
async fn violation_scoping_on_postgres() {
    let Some((state, store)) = spawn_store().await else {
        return;
    };

    // Arrange: two instructors, one exam each, two students
    let owner = insert_user(&store, Role::Instructor).await;
    let other_owner = insert_user(&store, Role::Instructor).await;
    let owned_exam = insert_exam(store.pool(), Some(owner), 10).await;
    let foreign_exam = insert_exam(store.pool(), Some(other_owner), 10).await;
    let alice = insert_user(&store, Role::Student).await;
    let bob = insert_user(&store, Role::Student).await;

    for (exam_id, student, kind) in [
        (owned_exam, alice, ViolationType::TabSwitch),
        (owned_exam, bob, ViolationType::TabSwitch),
        (owned_exam, bob, ViolationType::ShortcutAttempt),
        (foreign_exam, alice, ViolationType::WindowBlur),
    ] {
        state.proctor.record_violation(report(exam_id, student, kind)).await.unwrap();
    }

    // Students see only their own rows
    let student = Actor { user_id: alice, role: Role::Student };
    let own = state.proctor.list_violations(student, None, None).await.unwrap();
    assert_eq!(own.len(), 2);
    assert!(own.iter().all(|v| v.student_id == alice));

    // Instructors see only exams they own
    let instructor = Actor { user_id: owner, role: Role::Instructor };
    let mine = state.proctor.list_violations(instructor, None, None).await.unwrap();
    assert_eq!(mine.len(), 3);
    assert!(mine.iter().all(|v| v.exam_id == owned_exam));

    let limited = state.proctor.list_violations(instructor, None, Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);

    let foreign = state.proctor.list_violations(instructor, Some(foreign_exam), None).await;
    assert!(matches!(foreign, Err(AppError::Forbidden(_))));

    let stats = state.proctor.stats(instructor, None).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_type.get("TAB_SWITCH"), Some(&2));
    assert_eq!(stats.by_severity.get("high"), Some(&1));

    // Admins see any exam
    let admin = Actor { user_id: 0, role: Role::Admin };
    let any = state.proctor.list_violations(admin, Some(foreign_exam), None).await.unwrap();
    assert_eq!(any.len(), 1);

    let denied = state.proctor.stats(student, Some(owned_exam)).await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));
}
