// src/handlers/violation.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};

use crate::{
    error::AppError,
    handlers::ClientContext,
    models::violation::{
        RecordViolationRequest, ViolationListParams, ViolationStatsParams, ViolationType,
    },
    services::proctor::{ProctorService, ViolationReport},
    utils::jwt::Claims,
};

/// Records a proctoring event for the caller's attempt.
///
/// Reaching the exam's violation limit auto-submits the attempt; the
/// response says whether this call did so.
pub async fn record_violation(
    State(proctor): State<Arc<ProctorService>>,
    Extension(claims): Extension<Claims>,
    client: ClientContext,
    Json(payload): Json<RecordViolationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let violation_type: ViolationType = payload
        .violation_type
        .parse()
        .map_err(AppError::BadRequest)?;

    let outcome = proctor
        .record_violation(ViolationReport {
            exam_id: payload.exam_id,
            student_id: claims.user_id()?,
            violation_type,
            severity: payload.severity,
            description: payload.description.unwrap_or_default(),
            metadata: payload.metadata.unwrap_or(Value::Null),
            ip_address: client.ip_address,
            session_id: client.session_id,
            user_agent: client.user_agent,
            time_remaining: payload.time_remaining,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Lists violations visible to the caller, newest first.
pub async fn list_violations(
    State(proctor): State<Arc<ProctorService>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ViolationListParams>,
) -> Result<impl IntoResponse, AppError> {
    let violations = proctor
        .list_violations(claims.actor()?, params.exam_id, params.limit)
        .await?;

    Ok(Json(json!({
        "count": violations.len(),
        "violations": violations,
    })))
}

/// Aggregate counts by type and severity. Staff only.
pub async fn violation_stats(
    State(proctor): State<Arc<ProctorService>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ViolationStatsParams>,
) -> Result<impl IntoResponse, AppError> {
    let stats = proctor.stats(claims.actor()?, params.exam_id).await?;

    Ok(Json(stats))
}
