//! Approval workflow for pending matches.
//!
//! `pending -> approved` keeps the members matched. `pending -> rejected`
//! returns every member to the unmatched pool. Terminal matches never change.

use crate::middleware::tenant::TenantContext;
use crate::models::{MatchDetail, TransactionMatch};
use crate::services::capability::{Capability, CapabilityChecker};
use crate::services::metrics;
use crate::services::repository::{Decision, MatchFilter, Repository};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub const MAX_REJECTION_REASON_LEN: usize = 1000;

#[derive(Clone)]
pub struct ApprovalService {
    repo: Arc<dyn Repository>,
    checker: CapabilityChecker,
}

impl ApprovalService {
    pub fn new(repo: Arc<dyn Repository>, checker: CapabilityChecker) -> Self {
        Self { repo, checker }
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id))]
    pub async fn approve(
        &self,
        ctx: &TenantContext,
        match_id: Uuid,
    ) -> Result<TransactionMatch, AppError> {
        self.checker
            .require(ctx, Capability::ApproveMatches)
            .await?;

        let decided = self
            .repo
            .decide_match(ctx.tenant_id, match_id, Decision::Approve, &ctx.user_id)
            .await?;

        metrics::record_decision("approved");
        info!(match_id = %match_id, "Match approved");
        Ok(decided)
    }

    #[instrument(skip(self, ctx, reason), fields(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id))]
    pub async fn reject(
        &self,
        ctx: &TenantContext,
        match_id: Uuid,
        reason: &str,
    ) -> Result<TransactionMatch, AppError> {
        self.checker
            .require(ctx, Capability::ApproveMatches)
            .await?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A rejection reason is required"
            )));
        }
        if reason.chars().count() > MAX_REJECTION_REASON_LEN {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Rejection reason exceeds {} characters",
                MAX_REJECTION_REASON_LEN
            )));
        }

        let decided = self
            .repo
            .decide_match(
                ctx.tenant_id,
                match_id,
                Decision::Reject {
                    reason: reason.to_string(),
                },
                &ctx.user_id,
            )
            .await?;

        metrics::record_decision("rejected");
        info!(
            match_id = %match_id,
            members = decided.transaction_ids.len(),
            "Match rejected; members returned to unmatched"
        );
        Ok(decided)
    }

    pub async fn get_match(
        &self,
        ctx: &TenantContext,
        match_id: Uuid,
    ) -> Result<MatchDetail, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.repo
            .get_match(ctx.tenant_id, match_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match not found")))
    }

    pub async fn search(
        &self,
        ctx: &TenantContext,
        filter: &MatchFilter,
    ) -> Result<Vec<TransactionMatch>, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.repo.search_matches(ctx.tenant_id, filter).await
    }
}
