// src/handlers/answer.rs

use std::sync::Arc;

use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde_json::json;

use crate::{
    error::AppError,
    models::attempt::{SaveProgressRequest, normalize_answers},
    services::attempt::AttemptService,
    utils::jwt::Claims,
};

/// Auto-save endpoint polled by the exam client.
///
/// Merges the posted answers over the stored ones and echoes the stored
/// time remaining.
pub async fn save_progress(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SaveProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let answers = normalize_answers(&payload.answers);

    let time_remaining = attempts
        .save_progress(payload.exam_id, claims.user_id()?, &answers, payload.time_remaining)
        .await?;

    Ok(Json(json!({
        "message": "Progress saved",
        "timeRemaining": time_remaining,
    })))
}
