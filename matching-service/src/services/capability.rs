//! Capability checks for matching-service.
//!
//! Roles are a closed set and each maps to a fixed list of capabilities.
//! Role assignments are tenant-scoped and live in the repository.

use crate::middleware::tenant::TenantContext;
use crate::models::Role;
use crate::services::repository::Repository;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Run match sets and create manual matches.
    MatchTransactions,
    /// Approve or reject pending matches.
    ApproveMatches,
    ImportTransactions,
    /// Create schemas, data sources, rules and match sets.
    ManageConfiguration,
    ViewReconciliation,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MatchTransactions => "match:transactions",
            Self::ApproveMatches => "match:approve",
            Self::ImportTransactions => "import:transactions",
            Self::ManageConfiguration => "config:manage",
            Self::ViewReconciliation => "reconciliation:view",
        }
    }
}

impl Role {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Preparer => &[
                Capability::MatchTransactions,
                Capability::ImportTransactions,
                Capability::ViewReconciliation,
            ],
            Role::Approver => &[Capability::ApproveMatches, Capability::ViewReconciliation],
            Role::Admin => &[
                Capability::MatchTransactions,
                Capability::ApproveMatches,
                Capability::ImportTransactions,
                Capability::ManageConfiguration,
                Capability::ViewReconciliation,
            ],
        }
    }

    pub fn grants(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

#[derive(Clone)]
pub struct CapabilityChecker {
    repo: Arc<dyn Repository>,
    enforce: bool,
}

impl CapabilityChecker {
    pub fn new(repo: Arc<dyn Repository>, enforce: bool) -> Self {
        if !enforce {
            warn!("Capability enforcement disabled; trusting upstream gateway");
        }
        Self { repo, enforce }
    }

    #[instrument(skip(self), fields(capability = capability.as_str()))]
    pub async fn has_permission(
        &self,
        user_id: &str,
        capability: Capability,
        tenant_id: Uuid,
    ) -> Result<bool, AppError> {
        if !self.enforce {
            return Ok(true);
        }

        let roles = self.repo.roles_for(tenant_id, user_id).await?;
        let allowed = roles.iter().any(|r| r.grants(capability));
        debug!(roles = roles.len(), allowed, "Capability evaluated");
        Ok(allowed)
    }

    /// Forbidden unless the caller holds `capability` in their tenant.
    pub async fn require(
        &self,
        ctx: &TenantContext,
        capability: Capability,
    ) -> Result<(), AppError> {
        if self
            .has_permission(&ctx.user_id, capability, ctx.tenant_id)
            .await?
        {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Missing capability: {}",
                capability.as_str()
            )))
        }
    }
}
