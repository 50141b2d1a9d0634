//! Executes a claimed matching run: load, plan, commit, finish.

use crate::models::{MatchRule, RunStatus, Transaction};
use crate::services::grouping;
use crate::services::metrics;
use crate::services::repository::{
    CommitOutcome, PlannedMatch, PlannedUnmatchedRow, Repository, RunCommit, RunOutcome,
};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A run that already owns its match set.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub tenant_id: Uuid,
    pub match_set_id: Uuid,
    pub run_id: Uuid,
    /// Snapshot taken when the run was claimed.
    pub rule: MatchRule,
    pub data_source_ids: Vec<Uuid>,
    pub requested_by: String,
}

#[derive(Clone)]
pub struct RunExecutor {
    repo: Arc<dyn Repository>,
    timeout: Duration,
}

impl RunExecutor {
    pub fn new(repo: Arc<dyn Repository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    /// Runs `job` to completion or timeout and records the outcome on the
    /// match set. Never returns an error: failures become a failed run.
    #[instrument(skip(self, job), fields(tenant_id = %job.tenant_id, match_set_id = %job.match_set_id, run_id = %job.run_id))]
    pub async fn execute(&self, job: RunJob) -> RunOutcome {
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.match_and_commit(&job)).await
        {
            Ok(Ok(summary)) => RunOutcome::Completed(summary),
            Ok(Err(e)) => {
                error!(error = %e, "Matching run failed");
                metrics::record_error(e.kind());
                RunOutcome::Failed(failure_message(&e))
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Matching run timed out");
                metrics::record_error("run_timeout");
                RunOutcome::Failed(format!(
                    "run exceeded the {}s timeout",
                    self.timeout.as_secs()
                ))
            }
        };

        if let Err(e) = self
            .repo
            .finish_run(job.tenant_id, job.match_set_id, job.run_id, outcome.clone())
            .await
        {
            error!(error = %e, "Failed to record run outcome");
        }

        let status = match &outcome {
            RunOutcome::Completed(_) => RunStatus::Completed,
            RunOutcome::Failed(_) => RunStatus::Failed,
        };
        metrics::record_run(status.as_str(), start.elapsed().as_secs_f64());

        outcome
    }

    /// Releases a claimed run that will never execute.
    #[instrument(skip(self, job), fields(tenant_id = %job.tenant_id, match_set_id = %job.match_set_id, run_id = %job.run_id))]
    pub async fn abandon(&self, job: RunJob, reason: &str) {
        warn!(reason, "Matching run abandoned");
        if let Err(e) = self
            .repo
            .finish_run(
                job.tenant_id,
                job.match_set_id,
                job.run_id,
                RunOutcome::Failed(reason.to_string()),
            )
            .await
        {
            error!(error = %e, "Failed to record abandoned run");
        }
        metrics::record_run(RunStatus::Failed.as_str(), 0.0);
    }

    async fn match_and_commit(&self, job: &RunJob) -> Result<CommitOutcome, AppError> {
        let loaded = self
            .repo
            .load_unmatched(job.tenant_id, &job.data_source_ids)
            .await?;

        let pools: Vec<Vec<Transaction>> = job
            .data_source_ids
            .iter()
            .map(|ds| {
                loaded
                    .iter()
                    .filter(|t| t.data_source_id == *ds)
                    .cloned()
                    .collect()
            })
            .collect();

        let plan = grouping::plan(&pools, &job.rule);

        let commit = RunCommit {
            run_id: job.run_id,
            match_rule_id: job.rule.match_rule_id,
            matched_by: job.requested_by.clone(),
            groups: plan
                .groups
                .into_iter()
                .map(|g| PlannedMatch {
                    score: g.score.as_f64(),
                    transaction_ids: g.transaction_ids,
                })
                .collect(),
            unmatched: plan
                .unmatched
                .into_iter()
                .map(|u| PlannedUnmatchedRow {
                    transaction_id: u.transaction_id,
                    reason: u.reason.as_str().to_string(),
                })
                .collect(),
        };

        let summary = self
            .repo
            .commit_run(job.tenant_id, job.match_set_id, commit)
            .await?;

        metrics::record_matches_created("automatic", summary.groups_created as u64);
        info!(
            loaded = loaded.len(),
            groups_created = summary.groups_created,
            transactions_matched = summary.transactions_matched,
            transactions_unmatched = summary.transactions_unmatched,
            stale_groups = summary.stale_groups,
            "Matching run committed"
        );

        Ok(summary)
    }
}

fn failure_message(e: &AppError) -> String {
    match e {
        AppError::DatabaseError(_) | AppError::InternalError(_) => {
            "run failed: internal error".to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::memory::MemoryStore;
    use crate::services::repository::{
        NewDataSource, NewImport, NewMatchRule, NewMatchSet, NewTransaction, NormalizedRow,
    };
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    pub(crate) async fn seed(
        store: &MemoryStore,
        tenant: Uuid,
    ) -> (Uuid, MatchRule, Vec<Uuid>) {
        let mut sources = Vec::new();
        for (name, amount) in [("bank", "-100.00"), ("ledger", "100.00")] {
            let ds = store
                .create_data_source(
                    tenant,
                    NewDataSource {
                        name: name.to_string(),
                        description: None,
                        schema_id: None,
                        schema_definition: None,
                        default_currency: None,
                        created_by: "seed".to_string(),
                    },
                )
                .await
                .unwrap();
            let import = store
                .create_import(
                    tenant,
                    NewImport {
                        data_source_id: ds.data_source_id,
                        file_name: "seed.csv".to_string(),
                        file_size: 0,
                        imported_by: "seed".to_string(),
                    },
                )
                .await
                .unwrap();
            let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
            store
                .complete_import(
                    tenant,
                    import.import_id,
                    vec![NormalizedRow {
                        row_number: 1,
                        raw_data: serde_json::json!({}),
                        outcome: Ok(NewTransaction {
                            transaction_date: date,
                            post_date: date,
                            description: name.to_string(),
                            reference: "INV-1".to_string(),
                            amount: Decimal::from_str(amount).unwrap(),
                            currency: "USD".to_string(),
                        }),
                    }],
                )
                .await
                .unwrap();
            sources.push(ds.data_source_id);
        }

        let rule = store
            .create_match_rule(
                tenant,
                NewMatchRule {
                    name: "amount and date".to_string(),
                    description: None,
                    match_by_amount: true,
                    match_by_date: true,
                    date_tolerance_days: 0,
                    match_by_reference: false,
                    active: true,
                    created_by: "seed".to_string(),
                },
            )
            .await
            .unwrap();
        let set = store
            .create_match_set(
                tenant,
                NewMatchSet {
                    name: "bank vs ledger".to_string(),
                    description: None,
                    match_rule_id: rule.match_rule_id,
                    data_source_ids: sources.clone(),
                    created_by: "seed".to_string(),
                },
            )
            .await
            .unwrap();
        (set.match_set_id, rule, sources)
    }

    #[tokio::test]
    async fn test_execute_commits_and_finishes() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let (match_set_id, rule, sources) = seed(&store, tenant).await;
        let run_id = Uuid::new_v4();
        store
            .try_start_run(tenant, match_set_id, run_id, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let executor = RunExecutor::new(store.clone(), Duration::from_secs(5));
        let outcome = executor
            .execute(RunJob {
                tenant_id: tenant,
                match_set_id,
                run_id,
                rule,
                data_source_ids: sources,
                requested_by: "preparer-1".to_string(),
            })
            .await;

        match outcome {
            RunOutcome::Completed(summary) => {
                assert_eq!(summary.groups_created, 1);
                assert_eq!(summary.transactions_matched, 2);
                assert_eq!(summary.transactions_unmatched, 0);
            }
            RunOutcome::Failed(e) => panic!("run failed: {}", e),
        }

        let set = store.get_match_set(tenant, match_set_id).await.unwrap().unwrap();
        assert_eq!(set.run_status, "completed");
        assert_eq!(set.last_run_matched_groups, 1);
    }

    #[tokio::test]
    async fn test_execute_without_ownership_fails_run() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let (match_set_id, rule, sources) = seed(&store, tenant).await;

        // Never claimed: the commit is refused and nothing is matched.
        let executor = RunExecutor::new(store.clone(), Duration::from_secs(5));
        let outcome = executor
            .execute(RunJob {
                tenant_id: tenant,
                match_set_id,
                run_id: Uuid::new_v4(),
                rule,
                data_source_ids: sources,
                requested_by: "preparer-1".to_string(),
            })
            .await;

        assert!(matches!(outcome, RunOutcome::Failed(_)));
        let counts = store.match_set_counts(tenant, match_set_id).await.unwrap();
        assert_eq!(counts.matched_count, 0);
    }

    #[tokio::test]
    async fn test_timed_out_run_fails_and_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let (match_set_id, rule, sources) = seed(&store, tenant).await;
        let run_id = Uuid::new_v4();
        store
            .try_start_run(tenant, match_set_id, run_id, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let guard = store.stall().await;
        let executor = RunExecutor::new(store.clone(), Duration::from_millis(20));
        let handle = tokio::spawn(async move {
            executor
                .execute(RunJob {
                    tenant_id: tenant,
                    match_set_id,
                    run_id,
                    rule,
                    data_source_ids: sources,
                    requested_by: "preparer-1".to_string(),
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);

        let outcome = handle.await.unwrap();
        match outcome {
            RunOutcome::Failed(message) => assert!(message.contains("timeout")),
            RunOutcome::Completed(_) => panic!("run should have timed out"),
        }

        let set = store.get_match_set(tenant, match_set_id).await.unwrap().unwrap();
        assert_eq!(set.run_status, "failed");
        assert!(set.last_run_error.is_some());
        let counts = store.match_set_counts(tenant, match_set_id).await.unwrap();
        assert_eq!(counts.matched_count, 0);

        let next = store
            .try_start_run(tenant, match_set_id, Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert!(next.is_some());
    }
}
