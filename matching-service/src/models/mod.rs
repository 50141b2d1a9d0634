//! Domain models for matching-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Schema Registry Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Time,
    Object,
    Array,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Time => "time",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "time" => Self::Time,
            "object" => Self::Object,
            "array" => Self::Array,
            _ => Self::String,
        }
    }

    /// Unlike `from_str`, unknown names are rejected.
    pub fn parse_strict(s: &str) -> Option<Self> {
        let parsed = Self::from_str(s.trim());
        (parsed.as_str() == s.trim()).then_some(parsed)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DataSourceSchema {
    pub schema_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SchemaField {
    pub field_id: Uuid,
    pub schema_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub display_name: String,
    pub field_type: String,
    pub required: bool,
    pub default_value: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SchemaMapping {
    pub mapping_id: Uuid,
    pub schema_id: Uuid,
    pub tenant_id: Uuid,
    pub source_field_name: String,
    pub target_field_name: String,
    pub transformation: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FileParsingConfig {
    pub config_id: Uuid,
    pub schema_id: Uuid,
    pub tenant_id: Uuid,
    pub file_type: String,
    pub has_header_row: bool,
    pub delimiter: String,
    pub quote_char: String,
    pub date_format: Option<String>,
    pub time_format: Option<String>,
    pub number_format: String,
    pub created_utc: DateTime<Utc>,
}

/// Inline schema carried by a data source that has no registered schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub fields: Vec<SchemaDefinitionField>,
    #[serde(default)]
    pub date_format: Option<String>,
    /// Canonical field name -> source column name.
    #[serde(default)]
    pub default_mappings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinitionField {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

// ============================================================================
// Data Source Models
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DataSource {
    pub data_source_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub schema_id: Option<Uuid>,
    pub schema_definition: Option<Json<SchemaDefinition>>,
    pub default_currency: Option<String>,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Import Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ImportRecord {
    pub import_id: Uuid,
    pub tenant_id: Uuid,
    pub data_source_id: Uuid,
    pub file_name: String,
    pub file_size: i64,
    pub imported_by: String,
    pub row_count: i32,
    pub success_count: i32,
    pub error_count: i32,
    pub status: String,
    pub error_message: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub completed_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RawTransaction {
    pub raw_transaction_id: Uuid,
    pub import_id: Uuid,
    pub tenant_id: Uuid,
    pub row_number: i32,
    pub raw_data: Json<serde_json::Value>,
    pub error_message: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Transaction Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Unmatched,
    Matched,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Matched => "matched",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "matched" => Self::Matched,
            _ => Self::Unmatched,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub data_source_id: Uuid,
    pub import_id: Option<Uuid>,
    pub transaction_date: NaiveDate,
    pub post_date: NaiveDate,
    pub description: String,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Transaction {
    pub fn is_unmatched(&self) -> bool {
        TransactionStatus::from_str(&self.status) == TransactionStatus::Unmatched
    }
}

// ============================================================================
// Match Rule / Match Set Models
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MatchRule {
    pub match_rule_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub match_by_amount: bool,
    pub match_by_date: bool,
    pub date_tolerance_days: i32,
    pub match_by_reference: bool,
    pub active: bool,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

impl MatchRule {
    pub fn has_active_criteria(&self) -> bool {
        self.match_by_amount || self.match_by_date || self.match_by_reference
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MatchSet {
    pub match_set_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub match_rule_id: Uuid,
    /// Ordered; the first source anchors every run.
    pub data_source_ids: Vec<Uuid>,
    pub run_status: String,
    pub current_run_id: Option<Uuid>,
    pub run_started_utc: Option<DateTime<Utc>>,
    pub run_finished_utc: Option<DateTime<Utc>>,
    pub last_run_error: Option<String>,
    pub last_run_matched_groups: i32,
    pub last_run_unmatched: i32,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Match Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Approved,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Automatic,
    Manual,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "manual" => Self::Manual,
            _ => Self::Automatic,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TransactionMatch {
    pub match_id: Uuid,
    pub tenant_id: Uuid,
    pub match_set_id: Uuid,
    pub match_group_id: Uuid,
    pub match_status: String,
    pub match_type: String,
    /// Members at creation time; kept after a rejection unwinds them.
    pub transaction_ids: Vec<Uuid>,
    pub match_rule_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub score: Option<f64>,
    pub matched_by: String,
    pub approved_by: Option<String>,
    pub approval_date: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MatchedTransaction {
    pub match_set_id: Uuid,
    pub transaction_id: Uuid,
    pub match_group_id: Uuid,
    pub match_id: Uuid,
    pub tenant_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UnmatchedTransaction {
    pub match_set_id: Uuid,
    pub transaction_id: Uuid,
    pub run_id: Option<Uuid>,
    pub reason: String,
    pub tenant_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

/// A match together with the transactions it groups.
#[derive(Debug, Clone, Serialize)]
pub struct MatchDetail {
    #[serde(flatten)]
    pub transaction_match: TransactionMatch,
    pub transactions: Vec<Transaction>,
}

// ============================================================================
// Role Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Preparer,
    Approver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparer => "preparer",
            Self::Approver => "approver",
            Self::Admin => "admin",
        }
    }

    /// Strict parse; unknown role names are not silently widened.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preparer" => Some(Self::Preparer),
            "approver" => Some(Self::Approver),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}
