use crate::dtos::RejectMatchRequest;
use crate::middleware::TenantContext;
use crate::models::{MatchDetail, TransactionMatch};
use crate::services::repository::MatchFilter;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn search_matches(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(filter): Query<MatchFilter>,
) -> Result<Json<Vec<TransactionMatch>>, AppError> {
    Ok(Json(state.approvals.search(&ctx, &filter).await?))
}

pub async fn get_match(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_id): Path<Uuid>,
) -> Result<Json<MatchDetail>, AppError> {
    Ok(Json(state.approvals.get_match(&ctx, match_id).await?))
}

#[tracing::instrument(skip(state, ctx))]
pub async fn approve_match(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_id): Path<Uuid>,
) -> Result<Json<TransactionMatch>, AppError> {
    Ok(Json(state.approvals.approve(&ctx, match_id).await?))
}

#[tracing::instrument(skip(state, ctx, request))]
pub async fn reject_match(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_id): Path<Uuid>,
    Json(request): Json<RejectMatchRequest>,
) -> Result<Json<TransactionMatch>, AppError> {
    request.validate()?;

    Ok(Json(
        state
            .approvals
            .reject(&ctx, match_id, &request.reason)
            .await?,
    ))
}
