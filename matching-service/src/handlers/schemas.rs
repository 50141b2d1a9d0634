use crate::dtos::{
    CreateMappingRequest, CreateParsingConfigRequest, CreateSchemaRequest, SchemaFieldRequest,
};
use crate::middleware::TenantContext;
use crate::models::{FileParsingConfig, SchemaField, SchemaMapping};
use crate::services::SchemaWithFields;
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
pub async fn create_schema(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreateSchemaRequest>,
) -> Result<(StatusCode, Json<SchemaWithFields>), AppError> {
    request.validate()?;

    let schema = state
        .schemas
        .create_schema(
            &ctx,
            request.name,
            request.description,
            request.fields.into_iter().map(Into::into).collect(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(schema)))
}

pub async fn get_schema(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(schema_id): Path<Uuid>,
) -> Result<Json<SchemaWithFields>, AppError> {
    Ok(Json(state.schemas.get_schema(&ctx, schema_id).await?))
}

#[tracing::instrument(skip(state, ctx, request))]
pub async fn add_schema_field(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(schema_id): Path<Uuid>,
    Json(request): Json<SchemaFieldRequest>,
) -> Result<(StatusCode, Json<SchemaField>), AppError> {
    request.validate()?;

    let field = state
        .schemas
        .add_field(&ctx, schema_id, request.into())
        .await?;
    Ok((StatusCode::CREATED, Json(field)))
}

#[tracing::instrument(skip(state, ctx, request))]
pub async fn create_schema_mapping(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(schema_id): Path<Uuid>,
    Json(request): Json<CreateMappingRequest>,
) -> Result<(StatusCode, Json<SchemaMapping>), AppError> {
    request.validate()?;

    let mapping = state
        .schemas
        .create_mapping(&ctx, schema_id, request.into())
        .await?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

pub async fn list_schema_mappings(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(schema_id): Path<Uuid>,
) -> Result<Json<Vec<SchemaMapping>>, AppError> {
    Ok(Json(state.schemas.list_mappings(&ctx, schema_id).await?))
}

#[tracing::instrument(skip(state, ctx, request))]
pub async fn create_parsing_config(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(schema_id): Path<Uuid>,
    Json(request): Json<CreateParsingConfigRequest>,
) -> Result<(StatusCode, Json<FileParsingConfig>), AppError> {
    request.validate()?;

    let config = state
        .schemas
        .create_parsing_config(&ctx, schema_id, request.into())
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn get_parsing_config(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path((schema_id, file_type)): Path<(Uuid, String)>,
) -> Result<Json<FileParsingConfig>, AppError> {
    let config = state
        .schemas
        .get_parsing_config(&ctx, schema_id, &file_type)
        .await?;
    Ok(Json(config))
}
