use crate::dtos::ManualMatchRequest;
use crate::middleware::TenantContext;
use crate::models::{MatchDetail, RunStatus, UnmatchedTransaction};
use crate::services::{MatchSetStatus, RunMatchSetResponse};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// 202 when the run was handed to the queue, 200 once an inline run has
/// finished (completed or failed).
#[tracing::instrument(skip(state, ctx))]
pub async fn run_match_set(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_set_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunMatchSetResponse>), AppError> {
    let response = state.orchestrator.run_match_set(&ctx, match_set_id).await?;
    let status = match response.status {
        RunStatus::Running => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

pub async fn get_match_set_status(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_set_id): Path<Uuid>,
) -> Result<Json<MatchSetStatus>, AppError> {
    Ok(Json(
        state.orchestrator.get_status(&ctx, match_set_id).await?,
    ))
}

pub async fn list_unmatched(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_set_id): Path<Uuid>,
) -> Result<Json<Vec<UnmatchedTransaction>>, AppError> {
    Ok(Json(
        state.orchestrator.list_unmatched(&ctx, match_set_id).await?,
    ))
}

#[tracing::instrument(skip(state, ctx, request))]
pub async fn create_manual_match(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_set_id): Path<Uuid>,
    Json(request): Json<ManualMatchRequest>,
) -> Result<(StatusCode, Json<MatchDetail>), AppError> {
    request.validate()?;

    let detail = state
        .orchestrator
        .create_manual_match(&ctx, match_set_id, request.transaction_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}
