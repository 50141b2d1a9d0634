//! Persistence boundary for the matching engine.
//!
//! Every operation is tenant-scoped: a record that belongs to another tenant
//! is indistinguishable from one that does not exist.

use crate::models::{
    DataSource, DataSourceSchema, FileParsingConfig, ImportRecord, MatchDetail, MatchRule,
    MatchSet, MatchStatus, MatchType, RawTransaction, Role, SchemaDefinition, SchemaField,
    SchemaMapping, Transaction, TransactionMatch, UnmatchedTransaction,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewSchema {
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct NewSchemaField {
    pub name: String,
    pub display_name: String,
    pub field_type: String,
    pub required: bool,
    pub default_value: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone)]
pub struct NewSchemaMapping {
    pub source_field_name: String,
    pub target_field_name: String,
    pub transformation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewParsingConfig {
    pub file_type: String,
    pub has_header_row: bool,
    pub delimiter: String,
    pub quote_char: String,
    pub date_format: Option<String>,
    pub time_format: Option<String>,
    pub number_format: String,
}

#[derive(Debug, Clone)]
pub struct NewDataSource {
    pub name: String,
    pub description: Option<String>,
    pub schema_id: Option<Uuid>,
    pub schema_definition: Option<SchemaDefinition>,
    pub default_currency: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct NewMatchRule {
    pub name: String,
    pub description: Option<String>,
    pub match_by_amount: bool,
    pub match_by_date: bool,
    pub date_tolerance_days: i32,
    pub match_by_reference: bool,
    pub active: bool,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct NewMatchSet {
    pub name: String,
    pub description: Option<String>,
    pub match_rule_id: Uuid,
    pub data_source_ids: Vec<Uuid>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct NewImport {
    pub data_source_id: Uuid,
    pub file_name: String,
    pub file_size: i64,
    pub imported_by: String,
}

/// Canonical transaction produced by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub transaction_date: NaiveDate,
    pub post_date: NaiveDate,
    pub description: String,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Outcome for one source row.
#[derive(Debug, Clone)]
pub struct NormalizedRow {
    pub row_number: i32,
    pub raw_data: serde_json::Value,
    pub outcome: Result<NewTransaction, String>,
}

#[derive(Debug, Clone)]
pub struct PlannedMatch {
    pub transaction_ids: Vec<Uuid>,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct PlannedUnmatchedRow {
    pub transaction_id: Uuid,
    pub reason: String,
}

/// Everything a completed run writes, applied atomically.
#[derive(Debug, Clone)]
pub struct RunCommit {
    pub run_id: Uuid,
    pub match_rule_id: Uuid,
    pub matched_by: String,
    pub groups: Vec<PlannedMatch>,
    pub unmatched: Vec<PlannedUnmatchedRow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub groups_created: i32,
    pub transactions_matched: i32,
    pub transactions_unmatched: i32,
    /// Groups skipped because a member stopped being unmatched after load.
    pub stale_groups: i32,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(CommitOutcome),
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchSetCounts {
    pub total_transactions: i64,
    pub matched_count: i64,
    pub unmatched_count: i64,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Approve,
    Reject { reason: String },
}

impl Decision {
    pub fn status(&self) -> MatchStatus {
        match self {
            Self::Approve => MatchStatus::Approved,
            Self::Reject { .. } => MatchStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchFilter {
    pub match_set_id: Option<Uuid>,
    pub status: Option<MatchStatus>,
    pub match_type: Option<MatchType>,
    pub matched_by: Option<String>,
    pub approved_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl MatchFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
pub trait Repository: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Schema registry
    async fn create_schema(
        &self,
        tenant_id: Uuid,
        schema: NewSchema,
    ) -> Result<DataSourceSchema, AppError>;
    async fn get_schema(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Option<DataSourceSchema>, AppError>;
    async fn add_schema_field(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        field: NewSchemaField,
    ) -> Result<SchemaField, AppError>;
    async fn list_schema_fields(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Vec<SchemaField>, AppError>;
    /// Conflict when the source field is already mapped for the schema.
    async fn create_schema_mapping(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        mapping: NewSchemaMapping,
    ) -> Result<SchemaMapping, AppError>;
    async fn list_schema_mappings(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Vec<SchemaMapping>, AppError>;
    /// Conflict when a config already exists for the file type.
    async fn create_parsing_config(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        config: NewParsingConfig,
    ) -> Result<FileParsingConfig, AppError>;
    async fn get_parsing_config(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        file_type: &str,
    ) -> Result<Option<FileParsingConfig>, AppError>;

    // Configuration
    async fn create_data_source(
        &self,
        tenant_id: Uuid,
        data_source: NewDataSource,
    ) -> Result<DataSource, AppError>;
    async fn get_data_source(
        &self,
        tenant_id: Uuid,
        data_source_id: Uuid,
    ) -> Result<Option<DataSource>, AppError>;
    async fn create_match_rule(
        &self,
        tenant_id: Uuid,
        rule: NewMatchRule,
    ) -> Result<MatchRule, AppError>;
    async fn get_match_rule(
        &self,
        tenant_id: Uuid,
        match_rule_id: Uuid,
    ) -> Result<Option<MatchRule>, AppError>;
    async fn create_match_set(
        &self,
        tenant_id: Uuid,
        match_set: NewMatchSet,
    ) -> Result<MatchSet, AppError>;
    async fn get_match_set(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<Option<MatchSet>, AppError>;

    // Imports
    async fn create_import(
        &self,
        tenant_id: Uuid,
        import: NewImport,
    ) -> Result<ImportRecord, AppError>;
    /// Persists every row outcome and closes the import. Imports into the
    /// same data source are serialized.
    async fn complete_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
        rows: Vec<NormalizedRow>,
    ) -> Result<ImportRecord, AppError>;
    async fn fail_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
        error_message: &str,
    ) -> Result<ImportRecord, AppError>;
    async fn get_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
    ) -> Result<Option<ImportRecord>, AppError>;
    async fn list_raw_transactions(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
    ) -> Result<Vec<RawTransaction>, AppError>;

    // Transactions
    async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError>;
    async fn get_transactions(
        &self,
        tenant_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> Result<Vec<Transaction>, AppError>;
    async fn load_unmatched(
        &self,
        tenant_id: Uuid,
        data_source_ids: &[Uuid],
    ) -> Result<Vec<Transaction>, AppError>;

    // Runs
    /// Moves the match set to `running` unless another run holds it. A run
    /// that started before `stale_before` is taken over. Returns `None` when
    /// the match set is busy.
    async fn try_start_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        run_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<MatchSet>, AppError>;
    async fn commit_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        commit: RunCommit,
    ) -> Result<CommitOutcome, AppError>;
    /// No-op when `run_id` no longer owns the match set.
    async fn finish_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        run_id: Uuid,
        outcome: RunOutcome,
    ) -> Result<(), AppError>;
    async fn match_set_counts(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<MatchSetCounts, AppError>;

    // Matches
    /// Conflict when any transaction is no longer unmatched.
    async fn create_manual_match(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        transaction_ids: &[Uuid],
        matched_by: &str,
    ) -> Result<MatchDetail, AppError>;
    async fn get_match(
        &self,
        tenant_id: Uuid,
        match_id: Uuid,
    ) -> Result<Option<MatchDetail>, AppError>;
    /// NotFound for unknown matches, Conflict for terminal ones.
    async fn decide_match(
        &self,
        tenant_id: Uuid,
        match_id: Uuid,
        decision: Decision,
        decided_by: &str,
    ) -> Result<TransactionMatch, AppError>;
    async fn search_matches(
        &self,
        tenant_id: Uuid,
        filter: &MatchFilter,
    ) -> Result<Vec<TransactionMatch>, AppError>;
    async fn list_unmatched(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<Vec<UnmatchedTransaction>, AppError>;

    // Roles
    async fn assign_role(&self, tenant_id: Uuid, user_id: &str, role: Role)
        -> Result<(), AppError>;
    async fn roles_for(&self, tenant_id: Uuid, user_id: &str) -> Result<Vec<Role>, AppError>;
}
