// src/handlers/auth.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::{
    error::AppError,
    handlers::ClientContext,
    models::{
        session::{LogoutRequest, RefreshRequest},
        user::{LoginRequest, RegisterRequest},
    },
    services::auth::AuthService,
    utils::jwt::Claims,
};

/// Registers a new user and signs them in.
///
/// Any session the user had elsewhere is closed. Returns 201 Created with
/// the token pair and the user object (excluding password).
pub async fn register(
    State(auth): State<Arc<AuthService>>,
    client: ClientContext,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = auth.register(payload, client.device_info()).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Authenticates with email and password and returns a token pair.
pub async fn login(
    State(auth): State<Arc<AuthService>>,
    client: ClientContext,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = auth.login(payload, client.device_info()).await?;

    Ok(Json(response))
}

/// Rotates a refresh token into a new pair.
pub async fn refresh(
    State(auth): State<Arc<AuthService>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = auth.refresh(&payload.refresh_token).await?;

    Ok(Json(tokens))
}

/// Revokes the presented access token and, if supplied, the refresh token.
/// The body is optional.
pub async fn logout(
    State(auth): State<Arc<AuthService>>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let payload: LogoutRequest = if body.is_empty() {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    auth.logout(&claims, payload.refresh_token.as_deref()).await?;

    Ok(Json(json!({ "message": "Logged out successfully" })))
}

pub async fn profile(
    State(auth): State<Arc<AuthService>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth.profile(claims.user_id()?).await?;

    Ok(Json(json!({ "user": user })))
}

/// Lists the caller's active sessions. Token ids are never exposed.
pub async fn list_sessions(
    State(auth): State<Arc<AuthService>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = auth.list_sessions(claims.user_id()?).await?;

    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn revoke_session(
    State(auth): State<Arc<AuthService>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    auth.revoke_session(claims.user_id()?, session_id).await?;

    Ok(Json(json!({ "message": "Session revoked successfully" })))
}
