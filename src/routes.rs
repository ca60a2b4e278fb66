// src/routes.rs

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{self, answer, auth, exam, violation},
    state::AppState,
    utils::jwt::{auth_middleware, staff_middleware},
};

/// Assembles the main application router.
///
/// * Public routes: health, register, login, refresh.
/// * Everything else sits behind `auth_middleware`; violation stats also
///   behind `staff_middleware`.
/// * Applies global middleware (Trace, CORS) and mounts it all under `/api`.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-session-id"),
        ]);

    let require_auth = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let public_auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh));

    let protected_auth_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/profile", get(auth::profile))
        .route("/sessions", get(auth::list_sessions))
        .route("/sessions/{id}", delete(auth::revoke_session))
        .layer(require_auth.clone());

    let exam_routes = Router::new()
        .route("/{id}/start", post(exam::start_exam))
        .route("/{id}/submit", post(exam::submit_exam))
        .route("/{id}/progress", get(exam::get_progress))
        .route("/{id}/results", get(exam::get_results))
        .layer(require_auth.clone());

    let answer_routes = Router::new()
        .route("/save", post(answer::save_progress))
        .layer(require_auth.clone());

    let violation_routes = Router::new()
        .route(
            "/",
            post(violation::record_violation).get(violation::list_violations),
        )
        .merge(
            Router::new()
                .route("/stats", get(violation::violation_stats))
                .layer(middleware::from_fn(staff_middleware)),
        )
        // Auth runs first, then the staff check on /stats
        .layer(require_auth);

    let api = Router::new()
        .route("/health", get(handlers::health))
        .nest("/auth", public_auth_routes.merge(protected_auth_routes))
        .nest("/exam", exam_routes)
        .nest("/answer", answer_routes)
        .nest("/violation", violation_routes);

    Router::new()
        .nest("/api", api)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
