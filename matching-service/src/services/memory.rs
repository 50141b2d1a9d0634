//! In-process [`Repository`] backed by a single mutex.
//!
//! Holding one lock for the whole of every operation gives the same
//! guarantees the PostgreSQL store gets from conditional updates and
//! transactions: run starts are exclusive, commits are atomic and imports
//! into a data source never interleave.

use crate::models::{
    DataSource, DataSourceSchema, FileParsingConfig, ImportRecord, ImportStatus, MatchDetail,
    MatchRule, MatchSet, MatchStatus, MatchType, MatchedTransaction, RawTransaction, Role,
    RunStatus, SchemaField, SchemaMapping, Transaction, TransactionMatch, TransactionStatus,
    UnmatchedTransaction,
};
use crate::services::repository::{
    CommitOutcome, Decision, MatchFilter, MatchSetCounts, NewDataSource, NewImport,
    NewMatchRule, NewMatchSet, NewParsingConfig, NewSchema, NewSchemaField, NewSchemaMapping,
    NormalizedRow, Repository, RunCommit, RunOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::types::Json;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Default)]
pub(crate) struct State {
    schemas: HashMap<Uuid, DataSourceSchema>,
    schema_fields: Vec<SchemaField>,
    schema_mappings: Vec<SchemaMapping>,
    parsing_configs: Vec<FileParsingConfig>,
    data_sources: HashMap<Uuid, DataSource>,
    match_rules: HashMap<Uuid, MatchRule>,
    match_sets: HashMap<Uuid, MatchSet>,
    imports: HashMap<Uuid, ImportRecord>,
    raw_transactions: Vec<RawTransaction>,
    transactions: HashMap<Uuid, Transaction>,
    matches: HashMap<Uuid, TransactionMatch>,
    /// Keyed by transaction id: one active match per transaction.
    matched: HashMap<Uuid, MatchedTransaction>,
    unmatched: Vec<UnmatchedTransaction>,
    roles: HashSet<(Uuid, String, Role)>,
}

impl State {
    fn match_set(&mut self, tenant_id: Uuid, match_set_id: Uuid) -> Result<&mut MatchSet, AppError> {
        self.match_sets
            .get_mut(&match_set_id)
            .filter(|ms| ms.tenant_id == tenant_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match set not found")))
    }

    fn is_unmatched(&self, tenant_id: Uuid, transaction_id: Uuid) -> bool {
        self.transactions
            .get(&transaction_id)
            .map(|t| t.tenant_id == tenant_id && t.is_unmatched())
            .unwrap_or(false)
            && !self.matched.contains_key(&transaction_id)
    }

    fn set_status(&mut self, transaction_id: Uuid, status: TransactionStatus, now: DateTime<Utc>) {
        if let Some(t) = self.transactions.get_mut(&transaction_id) {
            t.status = status.as_str().to_string();
            t.updated_utc = now;
        }
    }

    fn detail(&self, m: &TransactionMatch) -> MatchDetail {
        let transactions = m
            .transaction_ids
            .iter()
            .filter_map(|id| self.transactions.get(id).cloned())
            .collect();
        MatchDetail {
            transaction_match: m.clone(),
            transactions,
        }
    }

    /// Creates a pending match and flips its members to matched.
    fn insert_match(
        &mut self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        transaction_ids: &[Uuid],
        match_type: MatchType,
        rule_run_score: Option<(Uuid, Uuid, f64)>,
        matched_by: &str,
    ) -> TransactionMatch {
        let now = Utc::now();
        let m = TransactionMatch {
            match_id: Uuid::new_v4(),
            tenant_id,
            match_set_id,
            match_group_id: Uuid::new_v4(),
            match_status: MatchStatus::Pending.as_str().to_string(),
            match_type: match_type.as_str().to_string(),
            transaction_ids: transaction_ids.to_vec(),
            match_rule_id: rule_run_score.map(|(rule, _, _)| rule),
            run_id: rule_run_score.map(|(_, run, _)| run),
            score: rule_run_score.map(|(_, _, score)| score),
            matched_by: matched_by.to_string(),
            approved_by: None,
            approval_date: None,
            rejection_reason: None,
            created_utc: now,
        };

        for id in transaction_ids {
            self.matched.insert(
                *id,
                MatchedTransaction {
                    match_set_id,
                    transaction_id: *id,
                    match_group_id: m.match_group_id,
                    match_id: m.match_id,
                    tenant_id,
                    created_utc: now,
                },
            );
            self.set_status(*id, TransactionStatus::Matched, now);
        }
        self.unmatched
            .retain(|u| !(u.match_set_id == match_set_id && transaction_ids.contains(&u.transaction_id)));
        self.matches.insert(m.match_id, m.clone());
        m
    }
}

/// In-memory repository for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds the store lock: every operation waits until the guard drops.
    #[cfg(test)]
    pub(crate) async fn stall(&self) -> tokio::sync::MutexGuard<'_, State> {
        self.state.lock().await
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    // =========================================================================
    // Schema Registry
    // =========================================================================

    async fn create_schema(
        &self,
        tenant_id: Uuid,
        schema: NewSchema,
    ) -> Result<DataSourceSchema, AppError> {
        let record = DataSourceSchema {
            schema_id: Uuid::new_v4(),
            tenant_id,
            name: schema.name,
            description: schema.description,
            created_by: schema.created_by,
            created_utc: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.schemas.insert(record.schema_id, record.clone());
        Ok(record)
    }

    async fn get_schema(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Option<DataSourceSchema>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .schemas
            .get(&schema_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn add_schema_field(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        field: NewSchemaField,
    ) -> Result<SchemaField, AppError> {
        let mut state = self.state.lock().await;
        if state
            .schema_fields
            .iter()
            .any(|f| f.schema_id == schema_id && f.name == field.name)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Field '{}' already exists on schema",
                field.name
            )));
        }
        let record = SchemaField {
            field_id: Uuid::new_v4(),
            schema_id,
            tenant_id,
            name: field.name,
            display_name: field.display_name,
            field_type: field.field_type,
            required: field.required,
            default_value: field.default_value,
            position: field.position,
        };
        state.schema_fields.push(record.clone());
        Ok(record)
    }

    async fn list_schema_fields(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Vec<SchemaField>, AppError> {
        let state = self.state.lock().await;
        let mut fields: Vec<SchemaField> = state
            .schema_fields
            .iter()
            .filter(|f| f.tenant_id == tenant_id && f.schema_id == schema_id)
            .cloned()
            .collect();
        fields.sort_by_key(|f| (f.position, f.name.clone()));
        Ok(fields)
    }

    async fn create_schema_mapping(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        mapping: NewSchemaMapping,
    ) -> Result<SchemaMapping, AppError> {
        let mut state = self.state.lock().await;
        if state.schema_mappings.iter().any(|m| {
            m.schema_id == schema_id && m.source_field_name == mapping.source_field_name
        }) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Source field '{}' is already mapped",
                mapping.source_field_name
            )));
        }
        let record = SchemaMapping {
            mapping_id: Uuid::new_v4(),
            schema_id,
            tenant_id,
            source_field_name: mapping.source_field_name,
            target_field_name: mapping.target_field_name,
            transformation: mapping.transformation,
            created_utc: Utc::now(),
        };
        state.schema_mappings.push(record.clone());
        Ok(record)
    }

    async fn list_schema_mappings(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Vec<SchemaMapping>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .schema_mappings
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.schema_id == schema_id)
            .cloned()
            .collect())
    }

    async fn create_parsing_config(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        config: NewParsingConfig,
    ) -> Result<FileParsingConfig, AppError> {
        let mut state = self.state.lock().await;
        if state
            .parsing_configs
            .iter()
            .any(|c| c.schema_id == schema_id && c.file_type == config.file_type)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Parsing config for file type '{}' already exists",
                config.file_type
            )));
        }
        let record = FileParsingConfig {
            config_id: Uuid::new_v4(),
            schema_id,
            tenant_id,
            file_type: config.file_type,
            has_header_row: config.has_header_row,
            delimiter: config.delimiter,
            quote_char: config.quote_char,
            date_format: config.date_format,
            time_format: config.time_format,
            number_format: config.number_format,
            created_utc: Utc::now(),
        };
        state.parsing_configs.push(record.clone());
        Ok(record)
    }

    async fn get_parsing_config(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        file_type: &str,
    ) -> Result<Option<FileParsingConfig>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .parsing_configs
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.schema_id == schema_id && c.file_type == file_type)
            .cloned())
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    async fn create_data_source(
        &self,
        tenant_id: Uuid,
        data_source: NewDataSource,
    ) -> Result<DataSource, AppError> {
        let record = DataSource {
            data_source_id: Uuid::new_v4(),
            tenant_id,
            name: data_source.name,
            description: data_source.description,
            schema_id: data_source.schema_id,
            schema_definition: data_source.schema_definition.map(Json),
            default_currency: data_source.default_currency,
            created_by: data_source.created_by,
            created_utc: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.data_sources.insert(record.data_source_id, record.clone());
        Ok(record)
    }

    async fn get_data_source(
        &self,
        tenant_id: Uuid,
        data_source_id: Uuid,
    ) -> Result<Option<DataSource>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .data_sources
            .get(&data_source_id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    async fn create_match_rule(
        &self,
        tenant_id: Uuid,
        rule: NewMatchRule,
    ) -> Result<MatchRule, AppError> {
        let record = MatchRule {
            match_rule_id: Uuid::new_v4(),
            tenant_id,
            name: rule.name,
            description: rule.description,
            match_by_amount: rule.match_by_amount,
            match_by_date: rule.match_by_date,
            date_tolerance_days: rule.date_tolerance_days,
            match_by_reference: rule.match_by_reference,
            active: rule.active,
            created_by: rule.created_by,
            created_utc: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.match_rules.insert(record.match_rule_id, record.clone());
        Ok(record)
    }

    async fn get_match_rule(
        &self,
        tenant_id: Uuid,
        match_rule_id: Uuid,
    ) -> Result<Option<MatchRule>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .match_rules
            .get(&match_rule_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn create_match_set(
        &self,
        tenant_id: Uuid,
        match_set: NewMatchSet,
    ) -> Result<MatchSet, AppError> {
        let record = MatchSet {
            match_set_id: Uuid::new_v4(),
            tenant_id,
            name: match_set.name,
            description: match_set.description,
            match_rule_id: match_set.match_rule_id,
            data_source_ids: match_set.data_source_ids,
            run_status: RunStatus::Idle.as_str().to_string(),
            current_run_id: None,
            run_started_utc: None,
            run_finished_utc: None,
            last_run_error: None,
            last_run_matched_groups: 0,
            last_run_unmatched: 0,
            created_by: match_set.created_by,
            created_utc: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.match_sets.insert(record.match_set_id, record.clone());
        Ok(record)
    }

    async fn get_match_set(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<Option<MatchSet>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .match_sets
            .get(&match_set_id)
            .filter(|ms| ms.tenant_id == tenant_id)
            .cloned())
    }

    // =========================================================================
    // Imports
    // =========================================================================

    async fn create_import(
        &self,
        tenant_id: Uuid,
        import: NewImport,
    ) -> Result<ImportRecord, AppError> {
        let record = ImportRecord {
            import_id: Uuid::new_v4(),
            tenant_id,
            data_source_id: import.data_source_id,
            file_name: import.file_name,
            file_size: import.file_size,
            imported_by: import.imported_by,
            row_count: 0,
            success_count: 0,
            error_count: 0,
            status: ImportStatus::Processing.as_str().to_string(),
            error_message: None,
            created_utc: Utc::now(),
            completed_utc: None,
        };
        let mut state = self.state.lock().await;
        state.imports.insert(record.import_id, record.clone());
        Ok(record)
    }

    #[instrument(skip(self, rows), fields(tenant_id = %tenant_id, import_id = %import_id, rows = rows.len()))]
    async fn complete_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
        rows: Vec<NormalizedRow>,
    ) -> Result<ImportRecord, AppError> {
        let mut state = self.state.lock().await;
        let import = state
            .imports
            .get(&import_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Import not found")))?;

        let now = Utc::now();
        let (mut success, mut errors) = (0, 0);
        for row in &rows {
            let (transaction_id, error_message) = match &row.outcome {
                Ok(new) => {
                    let txn = Transaction {
                        transaction_id: Uuid::new_v4(),
                        tenant_id,
                        data_source_id: import.data_source_id,
                        import_id: Some(import_id),
                        transaction_date: new.transaction_date,
                        post_date: new.post_date,
                        description: new.description.clone(),
                        reference: new.reference.clone(),
                        amount: new.amount,
                        currency: new.currency.clone(),
                        status: TransactionStatus::Unmatched.as_str().to_string(),
                        created_by: import.imported_by.clone(),
                        created_utc: now,
                        updated_utc: now,
                    };
                    let id = txn.transaction_id;
                    state.transactions.insert(id, txn);
                    success += 1;
                    (Some(id), None)
                }
                Err(message) => {
                    errors += 1;
                    (None, Some(message.clone()))
                }
            };
            state.raw_transactions.push(RawTransaction {
                raw_transaction_id: Uuid::new_v4(),
                import_id,
                tenant_id,
                row_number: row.row_number,
                raw_data: Json(row.raw_data.clone()),
                error_message,
                transaction_id,
                created_utc: now,
            });
        }

        let record = state
            .imports
            .get_mut(&import_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Import not found")))?;
        record.row_count = rows.len() as i32;
        record.success_count = success;
        record.error_count = errors;
        record.completed_utc = Some(now);
        if success > 0 {
            record.status = ImportStatus::Completed.as_str().to_string();
        } else {
            record.status = ImportStatus::Failed.as_str().to_string();
            record.error_message = Some(no_rows_message(rows.len()));
        }
        debug!(success, errors, "Import rows stored");
        Ok(record.clone())
    }

    async fn fail_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
        error_message: &str,
    ) -> Result<ImportRecord, AppError> {
        let mut state = self.state.lock().await;
        let record = state
            .imports
            .get_mut(&import_id)
            .filter(|i| i.tenant_id == tenant_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Import not found")))?;
        record.status = ImportStatus::Failed.as_str().to_string();
        record.error_message = Some(error_message.to_string());
        record.completed_utc = Some(Utc::now());
        Ok(record.clone())
    }

    async fn get_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
    ) -> Result<Option<ImportRecord>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .imports
            .get(&import_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_raw_transactions(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
    ) -> Result<Vec<RawTransaction>, AppError> {
        let state = self.state.lock().await;
        let mut rows: Vec<RawTransaction> = state
            .raw_transactions
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.import_id == import_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.row_number);
        Ok(rows)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .get(&transaction_id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_transactions(
        &self,
        tenant_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> Result<Vec<Transaction>, AppError> {
        let state = self.state.lock().await;
        Ok(transaction_ids
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn load_unmatched(
        &self,
        tenant_id: Uuid,
        data_source_ids: &[Uuid],
    ) -> Result<Vec<Transaction>, AppError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && data_source_ids.contains(&t.data_source_id)
                    && t.is_unmatched()
            })
            .cloned()
            .collect();
        rows.sort_by_key(|t| (t.transaction_date, t.transaction_id));
        Ok(rows)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    #[instrument(skip(self), fields(tenant_id = %tenant_id, match_set_id = %match_set_id))]
    async fn try_start_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        run_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<MatchSet>, AppError> {
        let mut state = self.state.lock().await;
        let ms = state.match_set(tenant_id, match_set_id)?;

        let busy = RunStatus::from_str(&ms.run_status) == RunStatus::Running
            && ms.run_started_utc.map(|t| t >= stale_before).unwrap_or(true);
        if busy {
            return Ok(None);
        }

        ms.run_status = RunStatus::Running.as_str().to_string();
        ms.current_run_id = Some(run_id);
        ms.run_started_utc = Some(Utc::now());
        ms.run_finished_utc = None;
        ms.last_run_error = None;
        Ok(Some(ms.clone()))
    }

    #[instrument(skip(self, commit), fields(tenant_id = %tenant_id, match_set_id = %match_set_id, run_id = %commit.run_id))]
    async fn commit_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        commit: RunCommit,
    ) -> Result<CommitOutcome, AppError> {
        let mut state = self.state.lock().await;
        {
            let ms = state.match_set(tenant_id, match_set_id)?;
            if ms.current_run_id != Some(commit.run_id)
                || RunStatus::from_str(&ms.run_status) != RunStatus::Running
            {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Run no longer owns the match set"
                )));
            }
        }

        let mut outcome = CommitOutcome::default();
        for group in &commit.groups {
            if !group
                .transaction_ids
                .iter()
                .all(|id| state.is_unmatched(tenant_id, *id))
            {
                outcome.stale_groups += 1;
                continue;
            }
            state.insert_match(
                tenant_id,
                match_set_id,
                &group.transaction_ids,
                MatchType::Automatic,
                Some((commit.match_rule_id, commit.run_id, group.score)),
                &commit.matched_by,
            );
            outcome.groups_created += 1;
            outcome.transactions_matched += group.transaction_ids.len() as i32;
        }

        state.unmatched.retain(|u| u.match_set_id != match_set_id);
        let now = Utc::now();
        for row in &commit.unmatched {
            if !state.is_unmatched(tenant_id, row.transaction_id) {
                continue;
            }
            state.unmatched.push(UnmatchedTransaction {
                match_set_id,
                transaction_id: row.transaction_id,
                run_id: Some(commit.run_id),
                reason: row.reason.clone(),
                tenant_id,
                created_utc: now,
            });
            outcome.transactions_unmatched += 1;
        }

        Ok(outcome)
    }

    async fn finish_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        run_id: Uuid,
        outcome: RunOutcome,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let ms = state.match_set(tenant_id, match_set_id)?;
        if ms.current_run_id != Some(run_id) {
            return Ok(());
        }
        ms.run_finished_utc = Some(Utc::now());
        match outcome {
            RunOutcome::Completed(summary) => {
                ms.run_status = RunStatus::Completed.as_str().to_string();
                ms.last_run_error = None;
                ms.last_run_matched_groups = summary.groups_created;
                ms.last_run_unmatched = summary.transactions_unmatched;
            }
            RunOutcome::Failed(message) => {
                ms.run_status = RunStatus::Failed.as_str().to_string();
                ms.last_run_error = Some(message);
            }
        }
        Ok(())
    }

    async fn match_set_counts(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<MatchSetCounts, AppError> {
        let mut state = self.state.lock().await;
        let sources = state.match_set(tenant_id, match_set_id)?.data_source_ids.clone();

        let mut counts = MatchSetCounts::default();
        for t in state
            .transactions
            .values()
            .filter(|t| t.tenant_id == tenant_id && sources.contains(&t.data_source_id))
        {
            counts.total_transactions += 1;
            if t.is_unmatched() {
                counts.unmatched_count += 1;
            }
        }
        counts.matched_count = state
            .matched
            .values()
            .filter(|m| m.match_set_id == match_set_id)
            .count() as i64;
        Ok(counts)
    }

    // =========================================================================
    // Matches
    // =========================================================================

    #[instrument(skip(self), fields(tenant_id = %tenant_id, match_set_id = %match_set_id))]
    async fn create_manual_match(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        transaction_ids: &[Uuid],
        matched_by: &str,
    ) -> Result<MatchDetail, AppError> {
        let mut state = self.state.lock().await;
        state.match_set(tenant_id, match_set_id)?;

        if let Some(busy) = transaction_ids
            .iter()
            .find(|id| !state.is_unmatched(tenant_id, **id))
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Transaction {} is already matched",
                busy
            )));
        }

        let m = state.insert_match(
            tenant_id,
            match_set_id,
            transaction_ids,
            MatchType::Manual,
            None,
            matched_by,
        );
        Ok(state.detail(&m))
    }

    async fn get_match(
        &self,
        tenant_id: Uuid,
        match_id: Uuid,
    ) -> Result<Option<MatchDetail>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .matches
            .get(&match_id)
            .filter(|m| m.tenant_id == tenant_id)
            .map(|m| state.detail(m)))
    }

    #[instrument(skip(self, decision), fields(tenant_id = %tenant_id, match_id = %match_id))]
    async fn decide_match(
        &self,
        tenant_id: Uuid,
        match_id: Uuid,
        decision: Decision,
        decided_by: &str,
    ) -> Result<TransactionMatch, AppError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let m = state
            .matches
            .get_mut(&match_id)
            .filter(|m| m.tenant_id == tenant_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match not found")))?;

        let current = MatchStatus::from_str(&m.match_status);
        if current.is_terminal() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Match is already {}",
                current.as_str()
            )));
        }

        m.match_status = decision.status().as_str().to_string();
        m.approved_by = Some(decided_by.to_string());
        m.approval_date = Some(now);
        if let Decision::Reject { reason } = &decision {
            m.rejection_reason = Some(reason.clone());
        }
        let updated = m.clone();

        if let Decision::Reject { reason } = decision {
            state.matched.retain(|_, row| row.match_id != match_id);
            for id in &updated.transaction_ids {
                state.set_status(*id, TransactionStatus::Unmatched, now);
                state
                    .unmatched
                    .retain(|u| !(u.match_set_id == updated.match_set_id && u.transaction_id == *id));
                state.unmatched.push(UnmatchedTransaction {
                    match_set_id: updated.match_set_id,
                    transaction_id: *id,
                    run_id: None,
                    reason: format!("match rejected: {}", reason),
                    tenant_id,
                    created_utc: now,
                });
            }
        }

        Ok(updated)
    }

    async fn search_matches(
        &self,
        tenant_id: Uuid,
        filter: &MatchFilter,
    ) -> Result<Vec<TransactionMatch>, AppError> {
        let state = self.state.lock().await;
        let mut rows: Vec<TransactionMatch> = state
            .matches
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .filter(|m| filter.match_set_id.map_or(true, |id| m.match_set_id == id))
            .filter(|m| filter.status.map_or(true, |s| m.match_status == s.as_str()))
            .filter(|m| filter.match_type.map_or(true, |t| m.match_type == t.as_str()))
            .filter(|m| {
                filter
                    .matched_by
                    .as_deref()
                    .map_or(true, |u| m.matched_by == u)
            })
            .filter(|m| {
                filter
                    .approved_by
                    .as_deref()
                    .map_or(true, |u| m.approved_by.as_deref() == Some(u))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then_with(|| a.match_id.cmp(&b.match_id))
        });
        Ok(rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn list_unmatched(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<Vec<UnmatchedTransaction>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .unmatched
            .iter()
            .filter(|u| u.tenant_id == tenant_id && u.match_set_id == match_set_id)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Roles
    // =========================================================================

    async fn assign_role(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        role: Role,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.roles.insert((tenant_id, user_id.to_string(), role));
        Ok(())
    }

    async fn roles_for(&self, tenant_id: Uuid, user_id: &str) -> Result<Vec<Role>, AppError> {
        let state = self.state.lock().await;
        let mut roles: Vec<Role> = state
            .roles
            .iter()
            .filter(|(t, u, _)| *t == tenant_id && u == user_id)
            .map(|(_, _, r)| *r)
            .collect();
        roles.sort_by_key(|r| r.as_str());
        Ok(roles)
    }
}

pub(crate) fn no_rows_message(row_count: usize) -> String {
    if row_count == 0 {
        "File contains no data rows".to_string()
    } else {
        "No rows could be imported".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::repository::{NewTransaction, PlannedMatch};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    async fn seed(store: &MemoryStore, tenant: Uuid) -> (MatchSet, Vec<Uuid>) {
        let ds_a = store
            .create_data_source(
                tenant,
                NewDataSource {
                    name: "bank".into(),
                    description: None,
                    schema_id: None,
                    schema_definition: None,
                    default_currency: None,
                    created_by: "u".into(),
                },
            )
            .await
            .unwrap();
        let rule = store
            .create_match_rule(
                tenant,
                NewMatchRule {
                    name: "r".into(),
                    description: None,
                    match_by_amount: true,
                    match_by_date: false,
                    date_tolerance_days: 0,
                    match_by_reference: false,
                    active: true,
                    created_by: "u".into(),
                },
            )
            .await
            .unwrap();
        let ms = store
            .create_match_set(
                tenant,
                NewMatchSet {
                    name: "ms".into(),
                    description: None,
                    match_rule_id: rule.match_rule_id,
                    data_source_ids: vec![ds_a.data_source_id],
                    created_by: "u".into(),
                },
            )
            .await
            .unwrap();
        let import = store
            .create_import(
                tenant,
                NewImport {
                    data_source_id: ds_a.data_source_id,
                    file_name: "a.csv".into(),
                    file_size: 10,
                    imported_by: "u".into(),
                },
            )
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let rows = (1..=2)
            .map(|n| NormalizedRow {
                row_number: n,
                raw_data: serde_json::json!({}),
                outcome: Ok(NewTransaction {
                    transaction_date: date,
                    post_date: date,
                    description: "d".into(),
                    reference: "r".into(),
                    amount: Decimal::new(100 * n as i64, 2),
                    currency: "USD".into(),
                }),
            })
            .collect();
        store
            .complete_import(tenant, import.import_id, rows)
            .await
            .unwrap();
        let ids = store
            .load_unmatched(tenant, &[ds_a.data_source_id])
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.transaction_id)
            .collect();
        (ms, ids)
    }

    #[tokio::test]
    async fn test_second_start_is_refused_until_stale() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let (ms, _) = seed(&store, tenant).await;
        let long_ago = Utc::now() - chrono::Duration::hours(1);

        let first = store
            .try_start_run(tenant, ms.match_set_id, Uuid::new_v4(), long_ago)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .try_start_run(tenant, ms.match_set_id, Uuid::new_v4(), long_ago)
            .await
            .unwrap();
        assert!(second.is_none());

        let takeover = store
            .try_start_run(
                tenant,
                ms.match_set_id,
                Uuid::new_v4(),
                Utc::now() + chrono::Duration::seconds(1),
            )
            .await
            .unwrap();
        assert!(takeover.is_some());
    }

    #[tokio::test]
    async fn test_commit_skips_stale_groups() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let (ms, ids) = seed(&store, tenant).await;
        let run_id = Uuid::new_v4();
        store
            .try_start_run(tenant, ms.match_set_id, run_id, Utc::now())
            .await
            .unwrap();

        store
            .create_manual_match(tenant, ms.match_set_id, &ids, "preparer")
            .await
            .unwrap();

        let outcome = store
            .commit_run(
                tenant,
                ms.match_set_id,
                RunCommit {
                    run_id,
                    match_rule_id: ms.match_rule_id,
                    matched_by: "system".into(),
                    groups: vec![PlannedMatch {
                        transaction_ids: ids.clone(),
                        score: 0.0,
                    }],
                    unmatched: vec![],
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.groups_created, 0);
        assert_eq!(outcome.stale_groups, 1);
        let counts = store.match_set_counts(tenant, ms.match_set_id).await.unwrap();
        assert_eq!(counts.matched_count, 2);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let (ms, ids) = seed(&store, tenant).await;
        let other = Uuid::new_v4();

        assert!(store
            .get_match_set(other, ms.match_set_id)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_transaction(other, ids[0]).await.unwrap().is_none());
        assert!(matches!(
            store.match_set_counts(other, ms.match_set_id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
