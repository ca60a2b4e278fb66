// tests/api_tests.rs

use std::{net::SocketAddr, sync::Arc};

use exam_sentinel::{
    config::Config,
    models::exam::{Exam, Question},
    routes,
    state::AppState,
    store::memory::MemoryStore,
};
use serde_json::{Value, json};

const EXAM_ID: i64 = 1000;

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_refresh_secret: "test_refresh_secret_for_integration_tests".to_string(),
        access_token_ttl: 600, // 10 minutes for tests
        refresh_token_ttl: 7 * 24 * 3600,
        submission_grace: 30,
        purge_interval: 600,
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        admin_email: None,
        admin_password: None,
        rust_log: "error".to_string(),
    }
}

/// Two questions keyed 1 and 0, auto-submitted on the second violation.
fn seeded_exam() -> Exam {
    let question = |correct: i64| Question {
        prompt: format!("Pick {correct}"),
        options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
        correct_option_index: correct,
        category: "General".to_string(),
        difficulty: "Easy".to_string(),
        explanation: "Because.".to_string(),
    };

    Exam {
        id: EXAM_ID,
        title: "Integration Exam".to_string(),
        instructor_id: None,
        duration: 20,
        max_violations: 2,
        passing_percentage: 60.0,
        is_active: true,
        questions: vec![question(1), question(0)],
    }
}

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345").
async fn spawn_app() -> String {
    // 1. In-memory store with one published exam
    let store = Arc::new(MemoryStore::new());
    store.insert_exam(seeded_exam()).await;

    // 2. Create the router with the app state
    let state = AppState::new(test_config(), store);
    let app = routes::create_router(state);

    // 3. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 4. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });

    address
}

/// Registers a fresh student and returns the auth response body.
async fn register(client: &reqwest::Client, address: &str) -> Value {
    let email = format!("s_{}@example.com", &uuid::Uuid::new_v4().to_string()[..8]);

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&json!({
            "name": "Student",
            "email": email,
            "password": "password123"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 201);
    response.json().await.expect("Failed to parse register json")
}

fn bearer(body: &Value) -> String {
    format!("Bearer {}", body["accessToken"].as_str().expect("Token not found"))
}

#[tokio::test]
async fn health_check_works() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .get(format!("{}/api/health", address))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn register_returns_tokens_and_user() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let body = register(&client, &address).await;

    // Assert
    assert!(body["accessToken"].is_string());
    assert!(body["refreshToken"].is_string());
    assert_eq!(body["user"]["role"], "student");
    assert!(body["user"].get("password").is_none());
}

#[tokio::test]
async fn register_fails_validation() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act: Send a password that is too short
    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&json!({
            "name": "Shorty",
            "email": "shorty@example.com",
            "password": "short"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let missing = client
        .post(format!("{}/api/exam/{}/start", address, EXAM_ID))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 401);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "MISSING_TOKEN");

    let garbage = client
        .post(format!("{}/api/exam/{}/start", address, EXAM_ID))
        .header("Authorization", "Bearer not.a.jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status().as_u16(), 401);
    let body: Value = garbage.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn exam_flow_start_save_submit() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let auth = bearer(&register(&client, &address).await);

    // 1. Start
    let start = client
        .post(format!("{}/api/exam/{}/start", address, EXAM_ID))
        .header("Authorization", &auth)
        .send()
        .await
        .expect("Start failed");
    assert_eq!(start.status().as_u16(), 200);
    let started: Value = start.json().await.unwrap();
    assert_eq!(started["exam"]["totalQuestions"], 2);
    assert_eq!(started["questions"][0]["questionIndex"], 0);
    assert!(started["questions"][0].get("correctOptionIndex").is_none());
    assert_eq!(started["progress"]["timeRemaining"], 1200);

    // 2. Auto-save one answer (plus a stale index that must be ignored)
    let save = client
        .post(format!("{}/api/answer/save", address))
        .header("Authorization", &auth)
        .json(&json!({
            "examId": EXAM_ID,
            "answers": [
                {"questionIndex": 0, "selectedOption": 1, "timeSpent": 12},
                {"questionIndex": 9, "selectedOption": 0, "timeSpent": 3}
            ],
            "timeRemaining": 1100
        }))
        .send()
        .await
        .expect("Save failed");
    assert_eq!(save.status().as_u16(), 200);
    let saved: Value = save.json().await.unwrap();
    assert_eq!(saved["timeRemaining"], 1100);

    // 3. Progress reflects the save
    let progress: Value = client
        .get(format!("{}/api/exam/{}/progress", address, EXAM_ID))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(progress["status"], "IN_PROGRESS");
    assert_eq!(progress["answers"][0]["selectedOption"], 1);

    // 4. Results are not available yet
    let early = client
        .get(format!("{}/api/exam/{}/results", address, EXAM_ID))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(early.status().as_u16(), 404);

    // 5. Submit the second answer
    let submit = client
        .post(format!("{}/api/exam/{}/submit", address, EXAM_ID))
        .header("Authorization", &auth)
        .json(&json!({
            "answers": [{"questionIndex": 1, "selectedOption": 0, "timeSpent": 20}],
            "timeRemaining": 900
        }))
        .send()
        .await
        .expect("Submit failed");
    assert_eq!(submit.status().as_u16(), 200);
    let summary: Value = submit.json().await.unwrap();
    assert_eq!(summary["score"], 100.0);
    assert_eq!(summary["correctAnswers"], 2);
    assert_eq!(summary["totalQuestions"], 2);
    assert_eq!(summary["passed"], true);

    // 6. Terminal: further saves are refused
    let late = client
        .post(format!("{}/api/answer/save", address))
        .header("Authorization", &auth)
        .json(&json!({"examId": EXAM_ID, "answers": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(late.status().as_u16(), 409);
    let body: Value = late.json().await.unwrap();
    assert_eq!(body["code"], "ALREADY_SUBMITTED");

    // 7. Results
    let results: Value = client
        .get(format!("{}/api/exam/{}/results", address, EXAM_ID))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["grade"], "A");
    assert_eq!(results["durationUsed"], 300);
    assert_eq!(results["status"], "SUBMITTED");
}

#[tokio::test]
async fn violations_trigger_auto_submit() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let auth = bearer(&register(&client, &address).await);

    client
        .post(format!("{}/api/exam/{}/start", address, EXAM_ID))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();

    let report = |violation_type: &str| {
        client
            .post(format!("{}/api/violation", address))
            .header("Authorization", &auth)
            .header("User-Agent", "integration-test")
            .header("X-Session-Id", "exam-session-1")
            .json(&json!({
                "examId": EXAM_ID,
                "type": violation_type,
                "description": "<b>blur</b><script>alert(1)</script>",
                "metadata": {"key": "Alt+Tab"}
            }))
            .send()
    };

    // 1. First violation is only recorded
    let first = report("WINDOW_BLUR").await.unwrap();
    assert_eq!(first.status().as_u16(), 201);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["violationCount"], 1);
    assert_eq!(first["maxViolations"], 2);
    assert_eq!(first["autoSubmitted"], false);
    assert_eq!(first["violation"]["severity"], "medium");
    assert!(first.get("submission").is_none());

    // 2. Second one reaches the limit
    let second: Value = report("SHORTCUT_ATTEMPT").await.unwrap().json().await.unwrap();
    assert_eq!(second["violationCount"], 2);
    assert_eq!(second["autoSubmitted"], true);
    assert_eq!(second["submission"]["status"], "AUTO_SUBMITTED");

    // 3. Third one changes nothing
    let third: Value = report("TAB_SWITCH").await.unwrap().json().await.unwrap();
    assert_eq!(third["violationCount"], 3);
    assert_eq!(third["autoSubmitted"], false);

    // 4. Unknown types are rejected
    let unknown = report("TELEPATHY").await.unwrap();
    assert_eq!(unknown.status().as_u16(), 400);

    // 5. The student sees their own rows, sanitized and with context
    let listed: Value = client
        .get(format!("{}/api/violation?examId={}&limit=2", address, EXAM_ID))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 2);
    let newest = &listed["violations"][0];
    assert_eq!(newest["type"], "TAB_SWITCH");
    assert_eq!(newest["description"], "<b>blur</b>");
    assert_eq!(newest["sessionId"], "exam-session-1");
    assert_eq!(newest["metadata"]["userAgent"], "integration-test");
    assert_eq!(newest["ipAddress"], "127.0.0.1");

    // 6. Stats are staff only
    let stats = client
        .get(format!("{}/api/violation/stats", address))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(stats.status().as_u16(), 403);

    // 7. The attempt is closed with the violation reason
    let results: Value = client
        .get(format!("{}/api/exam/{}/results", address, EXAM_ID))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["autoSubmitted"], true);
    assert_eq!(results["autoSubmitReason"], "VIOLATION_LIMIT");
}

#[tokio::test]
async fn instructor_reads_violation_stats() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let instructor: Value = client
        .post(format!("{}/api/auth/register", address))
        .json(&json!({
            "name": "Prof",
            "email": "prof@example.com",
            "password": "password123",
            "role": "instructor"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(instructor["user"]["role"], "instructor");

    let stats = client
        .get(format!("{}/api/violation/stats", address))
        .header("Authorization", bearer(&instructor))
        .send()
        .await
        .unwrap();
    assert_eq!(stats.status().as_u16(), 200);
    let stats: Value = stats.json().await.unwrap();
    assert_eq!(stats["total"], 0);

    // Not their exam
    let foreign = client
        .get(format!("{}/api/violation/stats?examId={}", address, EXAM_ID))
        .header("Authorization", bearer(&instructor))
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status().as_u16(), 403);
}

#[tokio::test]
async fn refresh_rotation_and_logout() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let login = register(&client, &address).await;
    let original = login["refreshToken"].as_str().unwrap().to_string();

    // 1. Refresh once
    let refreshed = client
        .post(format!("{}/api/auth/refresh", address))
        .json(&json!({ "refreshToken": original }))
        .send()
        .await
        .unwrap();
    assert_eq!(refreshed.status().as_u16(), 200);
    let pair: Value = refreshed.json().await.unwrap();
    assert_ne!(pair["refreshToken"], original.as_str());

    // 2. Replaying the old refresh token is refused
    let replay = client
        .post(format!("{}/api/auth/refresh", address))
        .json(&json!({ "refreshToken": original }))
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status().as_u16(), 401);
    let body: Value = replay.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_REVOKED");

    // 3. Session listing hides token ids
    let sessions: Value = client
        .get(format!("{}/api/auth/sessions", address))
        .header("Authorization", bearer(&pair))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions["sessions"].as_array().unwrap().len(), 1);
    assert!(sessions["sessions"][0].get("refreshTokenId").is_none());

    // 4. Logout with both tokens
    let logout = client
        .post(format!("{}/api/auth/logout", address))
        .header("Authorization", bearer(&pair))
        .json(&json!({ "refreshToken": pair["refreshToken"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status().as_u16(), 200);

    // 5. Both are dead now
    let profile = client
        .get(format!("{}/api/auth/profile", address))
        .header("Authorization", bearer(&pair))
        .send()
        .await
        .unwrap();
    assert_eq!(profile.status().as_u16(), 401);
    let body: Value = profile.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_REVOKED");

    let refresh = client
        .post(format!("{}/api/auth/refresh", address))
        .json(&json!({ "refreshToken": pair["refreshToken"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(refresh.status().as_u16(), 401);
}

#[tokio::test]
async fn login_elsewhere_ends_previous_session() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(format!("{}/api/auth/register", address))
        .json(&json!({
            "name": "Roamer",
            "email": "roamer@example.com",
            "password": "password123"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let second = client
        .post(format!("{}/api/auth/login", address))
        .json(&json!({ "email": "roamer@example.com", "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 200);

    let stale = client
        .post(format!("{}/api/auth/refresh", address))
        .json(&json!({ "refreshToken": first["refreshToken"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(stale.status().as_u16(), 401);
    let body: Value = stale.json().await.unwrap();
    assert_eq!(body["code"], "NO_ACTIVE_SESSION");

    let wrong_password = client
        .post(format!("{}/api/auth/login", address))
        .json(&json!({ "email": "roamer@example.com", "password": "password124" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_password.status().as_u16(), 401);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let payload = json!({
        "name": "Twin",
        "email": "twin@example.com",
        "password": "password123"
    });

    let first = client
        .post(format!("{}/api/auth/register", address))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);

    let second = client
        .post(format!("{}/api/auth/register", address))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);
}
