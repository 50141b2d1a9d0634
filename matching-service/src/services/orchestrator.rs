//! Matching orchestrator: run lifecycle, status, manual matches.

use crate::config::{RunConfig, RunMode};
use crate::middleware::tenant::TenantContext;
use crate::models::{MatchDetail, MatchSet, RunStatus, UnmatchedTransaction};
use crate::services::capability::{Capability, CapabilityChecker};
use crate::services::executor::{RunExecutor, RunJob};
use crate::services::metrics;
use crate::services::repository::{CommitOutcome, Repository, RunOutcome};
use crate::services::run_queue::RunQueue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RunMatchSetResponse {
    pub run_id: Uuid,
    pub match_set_id: Uuid,
    pub status: RunStatus,
    /// Present once the run has finished successfully.
    pub summary: Option<CommitOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub run_id: Option<Uuid>,
    pub started_utc: Option<DateTime<Utc>>,
    pub finished_utc: Option<DateTime<Utc>>,
    pub matched_groups: i32,
    pub unmatched: i32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchSetStatus {
    pub match_set_id: Uuid,
    pub status: RunStatus,
    pub total_transactions: i64,
    pub matched_count: i64,
    pub unmatched_count: i64,
    pub last_run: Option<LastRun>,
}

impl MatchSetStatus {
    fn last_run(match_set: &MatchSet) -> Option<LastRun> {
        match_set.run_started_utc.map(|started| LastRun {
            run_id: match_set.current_run_id,
            started_utc: Some(started),
            finished_utc: match_set.run_finished_utc,
            matched_groups: match_set.last_run_matched_groups,
            unmatched: match_set.last_run_unmatched,
            error: match_set.last_run_error.clone(),
        })
    }
}

#[derive(Clone)]
pub struct MatchingOrchestrator {
    repo: Arc<dyn Repository>,
    checker: CapabilityChecker,
    runs: RunConfig,
    executor: RunExecutor,
    queue: Option<RunQueue>,
}

impl MatchingOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        checker: CapabilityChecker,
        runs: RunConfig,
        queue: Option<RunQueue>,
    ) -> Self {
        let executor = RunExecutor::new(repo.clone(), runs.timeout());
        Self {
            repo,
            checker,
            runs,
            executor,
            queue,
        }
    }

    async fn require_match_set(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<MatchSet, AppError> {
        self.repo
            .get_match_set(tenant_id, match_set_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match set not found")))
    }

    /// Claims the match set and runs it inline or hands it to the queue.
    ///
    /// Conflict when another run holds the match set.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id))]
    pub async fn run_match_set(
        &self,
        ctx: &TenantContext,
        match_set_id: Uuid,
    ) -> Result<RunMatchSetResponse, AppError> {
        self.checker
            .require(ctx, Capability::MatchTransactions)
            .await?;

        let match_set = self.require_match_set(ctx.tenant_id, match_set_id).await?;
        let rule = self
            .repo
            .get_match_rule(ctx.tenant_id, match_set.match_rule_id)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Match set references a missing rule"))
            })?;

        if !rule.active {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Match rule is inactive"
            )));
        }
        if !rule.has_active_criteria() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Match rule has no active criteria"
            )));
        }
        if match_set.data_source_ids.len() < 2 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A match set needs at least two data sources"
            )));
        }

        let run_id = Uuid::new_v4();
        let stale_before = Utc::now() - self.runs.stale_after();
        let claimed = self
            .repo
            .try_start_run(ctx.tenant_id, match_set_id, run_id, stale_before)
            .await?
            .ok_or_else(|| {
                metrics::record_operation("run_match_set", "conflict");
                AppError::Conflict(anyhow::anyhow!("Match set is already running"))
            })?;

        info!(run_id = %run_id, mode = self.runs.mode.as_str(), "Matching run claimed");

        let job = RunJob {
            tenant_id: ctx.tenant_id,
            match_set_id,
            run_id,
            rule,
            data_source_ids: claimed.data_source_ids,
            requested_by: ctx.user_id.clone(),
        };

        match (self.runs.mode, &self.queue) {
            (RunMode::Queued, Some(queue)) => {
                if let Err(e) = queue.enqueue(job) {
                    warn!(run_id = %run_id, error = %e, "Run could not be queued");
                    self.repo
                        .finish_run(
                            ctx.tenant_id,
                            match_set_id,
                            run_id,
                            RunOutcome::Failed("run queue unavailable".to_string()),
                        )
                        .await?;
                    return Err(e);
                }
                metrics::record_operation("run_match_set", "queued");
                Ok(RunMatchSetResponse {
                    run_id,
                    match_set_id,
                    status: RunStatus::Running,
                    summary: None,
                    error: None,
                })
            }
            _ => {
                let outcome = self.executor.execute(job).await;
                let response = match outcome {
                    RunOutcome::Completed(summary) => RunMatchSetResponse {
                        run_id,
                        match_set_id,
                        status: RunStatus::Completed,
                        summary: Some(summary),
                        error: None,
                    },
                    RunOutcome::Failed(message) => RunMatchSetResponse {
                        run_id,
                        match_set_id,
                        status: RunStatus::Failed,
                        summary: None,
                        error: Some(message),
                    },
                };
                metrics::record_operation("run_match_set", response.status.as_str());
                Ok(response)
            }
        }
    }

    pub async fn get_status(
        &self,
        ctx: &TenantContext,
        match_set_id: Uuid,
    ) -> Result<MatchSetStatus, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;

        let match_set = self.require_match_set(ctx.tenant_id, match_set_id).await?;
        let counts = self
            .repo
            .match_set_counts(ctx.tenant_id, match_set_id)
            .await?;

        Ok(MatchSetStatus {
            match_set_id,
            status: RunStatus::from_str(&match_set.run_status),
            total_transactions: counts.total_transactions,
            matched_count: counts.matched_count,
            unmatched_count: counts.unmatched_count,
            last_run: MatchSetStatus::last_run(&match_set),
        })
    }

    /// Groups hand-picked transactions into a pending manual match.
    #[instrument(skip(self, ctx, transaction_ids), fields(tenant_id = %ctx.tenant_id, members = transaction_ids.len()))]
    pub async fn create_manual_match(
        &self,
        ctx: &TenantContext,
        match_set_id: Uuid,
        transaction_ids: Vec<Uuid>,
    ) -> Result<MatchDetail, AppError> {
        self.checker
            .require(ctx, Capability::MatchTransactions)
            .await?;

        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = transaction_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.len() < 2 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A manual match needs at least two distinct transactions"
            )));
        }

        let match_set = self.require_match_set(ctx.tenant_id, match_set_id).await?;
        let transactions = self.repo.get_transactions(ctx.tenant_id, &ids).await?;
        if transactions.len() != ids.len() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "One or more transactions not found"
            )));
        }

        let sources: HashSet<Uuid> = transactions.iter().map(|t| t.data_source_id).collect();
        if let Some(outsider) = transactions
            .iter()
            .find(|t| !match_set.data_source_ids.contains(&t.data_source_id))
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Transaction {} does not belong to the match set's data sources",
                outsider.transaction_id
            )));
        }
        if sources.len() < 2 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A manual match must span at least two data sources"
            )));
        }
        if let Some(taken) = transactions.iter().find(|t| !t.is_unmatched()) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Transaction {} is already matched",
                taken.transaction_id
            )));
        }

        let detail = self
            .repo
            .create_manual_match(ctx.tenant_id, match_set_id, &ids, &ctx.user_id)
            .await?;

        metrics::record_matches_created("manual", 1);
        info!(match_id = %detail.transaction_match.match_id, "Manual match created");
        Ok(detail)
    }

    pub async fn list_unmatched(
        &self,
        ctx: &TenantContext,
        match_set_id: Uuid,
    ) -> Result<Vec<UnmatchedTransaction>, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.require_match_set(ctx.tenant_id, match_set_id).await?;
        self.repo.list_unmatched(ctx.tenant_id, match_set_id).await
    }
}
