//! Data sources, match rules and match sets.

use crate::middleware::tenant::TenantContext;
use crate::models::{DataSource, MatchRule, MatchSet};
use crate::services::capability::{Capability, CapabilityChecker};
use crate::services::repository::{NewDataSource, NewMatchRule, NewMatchSet, Repository};
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct ConfigurationService {
    repo: Arc<dyn Repository>,
    checker: CapabilityChecker,
}

impl ConfigurationService {
    pub fn new(repo: Arc<dyn Repository>, checker: CapabilityChecker) -> Self {
        Self { repo, checker }
    }

    #[instrument(skip(self, ctx, data_source), fields(tenant_id = %ctx.tenant_id))]
    pub async fn create_data_source(
        &self,
        ctx: &TenantContext,
        mut data_source: NewDataSource,
    ) -> Result<DataSource, AppError> {
        self.checker
            .require(ctx, Capability::ManageConfiguration)
            .await?;

        if let Some(schema_id) = data_source.schema_id {
            if self.repo.get_schema(ctx.tenant_id, schema_id).await?.is_none() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Schema {} does not exist",
                    schema_id
                )));
            }
        }
        data_source.default_currency = data_source
            .default_currency
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty());
        data_source.created_by = ctx.user_id.clone();

        self.repo.create_data_source(ctx.tenant_id, data_source).await
    }

    pub async fn get_data_source(
        &self,
        ctx: &TenantContext,
        data_source_id: Uuid,
    ) -> Result<DataSource, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.repo
            .get_data_source(ctx.tenant_id, data_source_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Data source not found")))
    }

    #[instrument(skip(self, ctx, rule), fields(tenant_id = %ctx.tenant_id))]
    pub async fn create_match_rule(
        &self,
        ctx: &TenantContext,
        mut rule: NewMatchRule,
    ) -> Result<MatchRule, AppError> {
        self.checker
            .require(ctx, Capability::ManageConfiguration)
            .await?;

        if rule.date_tolerance_days < 0 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "date_tolerance_days must not be negative"
            )));
        }
        rule.created_by = ctx.user_id.clone();

        self.repo.create_match_rule(ctx.tenant_id, rule).await
    }

    pub async fn get_match_rule(
        &self,
        ctx: &TenantContext,
        match_rule_id: Uuid,
    ) -> Result<MatchRule, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.repo
            .get_match_rule(ctx.tenant_id, match_rule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match rule not found")))
    }

    /// A match set needs at least two distinct data sources and a rule, all
    /// owned by the caller's tenant.
    #[instrument(skip(self, ctx, match_set), fields(tenant_id = %ctx.tenant_id))]
    pub async fn create_match_set(
        &self,
        ctx: &TenantContext,
        mut match_set: NewMatchSet,
    ) -> Result<MatchSet, AppError> {
        self.checker
            .require(ctx, Capability::ManageConfiguration)
            .await?;

        let mut seen = HashSet::new();
        match_set.data_source_ids.retain(|id| seen.insert(*id));
        if match_set.data_source_ids.len() < 2 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A match set needs at least two distinct data sources"
            )));
        }

        for data_source_id in &match_set.data_source_ids {
            if self
                .repo
                .get_data_source(ctx.tenant_id, *data_source_id)
                .await?
                .is_none()
            {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Data source {} does not exist",
                    data_source_id
                )));
            }
        }

        if self
            .repo
            .get_match_rule(ctx.tenant_id, match_set.match_rule_id)
            .await?
            .is_none()
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Match rule {} does not exist",
                match_set.match_rule_id
            )));
        }

        match_set.created_by = ctx.user_id.clone();
        let created = self.repo.create_match_set(ctx.tenant_id, match_set).await?;
        info!(match_set_id = %created.match_set_id, "Match set configured");
        Ok(created)
    }

    pub async fn get_match_set(
        &self,
        ctx: &TenantContext,
        match_set_id: Uuid,
    ) -> Result<MatchSet, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.repo
            .get_match_set(ctx.tenant_id, match_set_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match set not found")))
    }
}
