use crate::dtos::{ImportTransactionsRequest, SuggestMappingRequest};
use crate::middleware::TenantContext;
use crate::models::{ImportRecord, RawTransaction, Transaction};
use crate::services::imports::MappingSuggestion;
use crate::services::ImportResult;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// Row-level failures never fail the request; they come back in
/// `row_errors` and on the raw rows.
#[tracing::instrument(skip(state, ctx, request))]
pub async fn import_transactions(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(data_source_id): Path<Uuid>,
    Json(request): Json<ImportTransactionsRequest>,
) -> Result<(StatusCode, Json<ImportResult>), AppError> {
    request.validate()?;

    let result = state
        .imports
        .import_transactions(&ctx, request.into_import(data_source_id))
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn suggest_mapping(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<SuggestMappingRequest>,
) -> Result<Json<MappingSuggestion>, AppError> {
    Ok(Json(
        state
            .imports
            .suggest_mapping(&ctx, request.headers, request.content)
            .await?,
    ))
}

pub async fn get_import(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(import_id): Path<Uuid>,
) -> Result<Json<ImportRecord>, AppError> {
    Ok(Json(state.imports.get_import(&ctx, import_id).await?))
}

pub async fn list_raw_transactions(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(import_id): Path<Uuid>,
) -> Result<Json<Vec<RawTransaction>>, AppError> {
    Ok(Json(
        state.imports.list_raw_transactions(&ctx, import_id).await?,
    ))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(
        state.imports.get_transaction(&ctx, transaction_id).await?,
    ))
}
