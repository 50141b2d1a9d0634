use crate::dtos::{CreateDataSourceRequest, CreateMatchRuleRequest, CreateMatchSetRequest};
use crate::middleware::TenantContext;
use crate::models::{DataSource, MatchRule, MatchSet};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[tracing::instrument(skip(state, ctx, request))]
pub async fn create_data_source(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreateDataSourceRequest>,
) -> Result<(StatusCode, Json<DataSource>), AppError> {
    request.validate()?;

    let data_source = state
        .configuration
        .create_data_source(&ctx, request.into())
        .await?;
    Ok((StatusCode::CREATED, Json(data_source)))
}

pub async fn get_data_source(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(data_source_id): Path<Uuid>,
) -> Result<Json<DataSource>, AppError> {
    let data_source = state
        .configuration
        .get_data_source(&ctx, data_source_id)
        .await?;
    Ok(Json(data_source))
}

#[tracing::instrument(skip(state, ctx, request))]
pub async fn create_match_rule(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreateMatchRuleRequest>,
) -> Result<(StatusCode, Json<MatchRule>), AppError> {
    request.validate()?;

    let rule = state
        .configuration
        .create_match_rule(&ctx, request.into())
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn get_match_rule(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_rule_id): Path<Uuid>,
) -> Result<Json<MatchRule>, AppError> {
    let rule = state
        .configuration
        .get_match_rule(&ctx, match_rule_id)
        .await?;
    Ok(Json(rule))
}

#[tracing::instrument(skip(state, ctx, request))]
pub async fn create_match_set(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreateMatchSetRequest>,
) -> Result<(StatusCode, Json<MatchSet>), AppError> {
    request.validate()?;

    let match_set = state
        .configuration
        .create_match_set(&ctx, request.into())
        .await?;
    Ok((StatusCode::CREATED, Json(match_set)))
}

pub async fn get_match_set(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(match_set_id): Path<Uuid>,
) -> Result<Json<MatchSet>, AppError> {
    let match_set = state
        .configuration
        .get_match_set(&ctx, match_set_id)
        .await?;
    Ok(Json(match_set))
}
