//! Schema registry: schemas, their fields, column mappings and file parsing
//! configurations.

use crate::middleware::tenant::TenantContext;
use crate::models::{DataSourceSchema, FieldType, FileParsingConfig, SchemaField, SchemaMapping};
use crate::services::amount::NumberFormat;
use crate::services::capability::{Capability, CapabilityChecker};
use crate::services::ingestion::{parse_separator, Transform};
use crate::services::repository::{
    NewParsingConfig, NewSchema, NewSchemaField, NewSchemaMapping, Repository,
};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SchemaWithFields {
    #[serde(flatten)]
    pub schema: DataSourceSchema,
    pub fields: Vec<SchemaField>,
}

#[derive(Clone)]
pub struct SchemaRegistry {
    repo: Arc<dyn Repository>,
    checker: CapabilityChecker,
}

impl SchemaRegistry {
    pub fn new(repo: Arc<dyn Repository>, checker: CapabilityChecker) -> Self {
        Self { repo, checker }
    }

    async fn require_schema(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<DataSourceSchema, AppError> {
        self.repo
            .get_schema(tenant_id, schema_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Schema not found")))
    }

    #[instrument(skip(self, ctx, fields), fields(tenant_id = %ctx.tenant_id))]
    pub async fn create_schema(
        &self,
        ctx: &TenantContext,
        name: String,
        description: Option<String>,
        fields: Vec<NewSchemaField>,
    ) -> Result<SchemaWithFields, AppError> {
        self.checker
            .require(ctx, Capability::ManageConfiguration)
            .await?;

        let schema = self
            .repo
            .create_schema(
                ctx.tenant_id,
                NewSchema {
                    name,
                    description,
                    created_by: ctx.user_id.clone(),
                },
            )
            .await?;

        let mut created = Vec::with_capacity(fields.len());
        for (position, mut field) in fields.into_iter().enumerate() {
            if field.position == 0 {
                field.position = position as i32;
            }
            created.push(self.add_field_unchecked(ctx.tenant_id, schema.schema_id, field).await?);
        }

        info!(schema_id = %schema.schema_id, fields = created.len(), "Schema registered");
        Ok(SchemaWithFields {
            schema,
            fields: created,
        })
    }

    pub async fn get_schema(
        &self,
        ctx: &TenantContext,
        schema_id: Uuid,
    ) -> Result<SchemaWithFields, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        let schema = self.require_schema(ctx.tenant_id, schema_id).await?;
        let fields = self.repo.list_schema_fields(ctx.tenant_id, schema_id).await?;
        Ok(SchemaWithFields { schema, fields })
    }

    async fn add_field_unchecked(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        mut field: NewSchemaField,
    ) -> Result<SchemaField, AppError> {
        field.field_type = FieldType::parse_strict(&field.field_type)
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "Unknown field type '{}'",
                    field.field_type
                ))
            })?
            .as_str()
            .to_string();
        if field.display_name.trim().is_empty() {
            field.display_name = field.name.clone();
        }
        self.repo.add_schema_field(tenant_id, schema_id, field).await
    }

    #[instrument(skip(self, ctx, field), fields(tenant_id = %ctx.tenant_id))]
    pub async fn add_field(
        &self,
        ctx: &TenantContext,
        schema_id: Uuid,
        field: NewSchemaField,
    ) -> Result<SchemaField, AppError> {
        self.checker
            .require(ctx, Capability::ManageConfiguration)
            .await?;
        self.require_schema(ctx.tenant_id, schema_id).await?;
        self.add_field_unchecked(ctx.tenant_id, schema_id, field).await
    }

    #[instrument(skip(self, ctx, mapping), fields(tenant_id = %ctx.tenant_id))]
    pub async fn create_mapping(
        &self,
        ctx: &TenantContext,
        schema_id: Uuid,
        mapping: NewSchemaMapping,
    ) -> Result<SchemaMapping, AppError> {
        self.checker
            .require(ctx, Capability::ManageConfiguration)
            .await?;
        self.require_schema(ctx.tenant_id, schema_id).await?;

        if let Some(expr) = mapping.transformation.as_deref() {
            Transform::parse_chain(expr)?;
        }

        self.repo
            .create_schema_mapping(ctx.tenant_id, schema_id, mapping)
            .await
    }

    pub async fn list_mappings(
        &self,
        ctx: &TenantContext,
        schema_id: Uuid,
    ) -> Result<Vec<SchemaMapping>, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.require_schema(ctx.tenant_id, schema_id).await?;
        self.repo.list_schema_mappings(ctx.tenant_id, schema_id).await
    }

    #[instrument(skip(self, ctx, config), fields(tenant_id = %ctx.tenant_id, file_type = %config.file_type))]
    pub async fn create_parsing_config(
        &self,
        ctx: &TenantContext,
        schema_id: Uuid,
        mut config: NewParsingConfig,
    ) -> Result<FileParsingConfig, AppError> {
        self.checker
            .require(ctx, Capability::ManageConfiguration)
            .await?;
        self.require_schema(ctx.tenant_id, schema_id).await?;

        parse_separator(&config.delimiter, "delimiter")?;
        parse_separator(&config.quote_char, "quote_char")?;
        config.file_type = config.file_type.trim().to_ascii_lowercase();
        config.number_format = NumberFormat::from_str(&config.number_format)
            .as_str()
            .to_string();

        self.repo
            .create_parsing_config(ctx.tenant_id, schema_id, config)
            .await
    }

    pub async fn get_parsing_config(
        &self,
        ctx: &TenantContext,
        schema_id: Uuid,
        file_type: &str,
    ) -> Result<FileParsingConfig, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.repo
            .get_parsing_config(ctx.tenant_id, schema_id, &file_type.trim().to_ascii_lowercase())
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Parsing config not found")))
    }
}
