// src/handlers/exam.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::attempt::{SubmitRequest, normalize_answers},
    services::attempt::{AttemptService, SubmitCommand},
    utils::jwt::Claims,
};

/// Starts the caller's attempt, or resumes the one in progress.
///
/// Returns the exam overview, the questions without their answer keys, and
/// the saved progress.
pub async fn start_exam(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let started = attempts.start(exam_id, claims.user_id()?).await?;

    Ok(Json(started))
}

/// Finalizes the caller's attempt and returns the score.
pub async fn submit_exam(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let summary = attempts
        .submit(SubmitCommand {
            exam_id,
            student_id: claims.user_id()?,
            answers: normalize_answers(&payload.answers),
            time_remaining: payload.time_remaining,
            violations_count: payload.violations_count,
            auto_submit: None,
        })
        .await?;

    Ok(Json(summary))
}

pub async fn get_progress(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let progress = attempts.progress(exam_id, claims.user_id()?).await?;

    Ok(Json(progress))
}

/// Score, grade and timing of a finished attempt. 404 while still in progress.
pub async fn get_results(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = attempts.result(exam_id, claims.user_id()?).await?;

    Ok(Json(result))
}
