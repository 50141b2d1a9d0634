use crate::models::SchemaDefinition;
use crate::services::repository::{
    NewDataSource, NewMatchRule, NewMatchSet, NewParsingConfig, NewSchemaField, NewSchemaMapping,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

fn default_true() -> bool {
    true
}

fn default_file_type() -> String {
    "csv".to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_quote_char() -> String {
    "\"".to_string()
}

fn default_number_format() -> String {
    "1,234.56".to_string()
}

// ============================================================================
// Schemas
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SchemaFieldRequest {
    #[validate(length(min = 1, max = 255, message = "Field name cannot be empty"))]
    pub name: String,
    pub display_name: Option<String>,
    #[validate(length(min = 1, message = "Field type is required"))]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    pub default_value: Option<String>,
    #[serde(default)]
    pub position: i32,
}

impl From<SchemaFieldRequest> for NewSchemaField {
    fn from(request: SchemaFieldRequest) -> Self {
        Self {
            display_name: request.display_name.unwrap_or_default(),
            name: request.name,
            field_type: request.field_type,
            required: request.required,
            default_value: request.default_value,
            position: request.position,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSchemaRequest {
    #[validate(length(min = 1, max = 255, message = "Schema name cannot be empty"))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub fields: Vec<SchemaFieldRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMappingRequest {
    #[validate(length(min = 1, message = "Source field is required"))]
    pub source_field_name: String,
    #[validate(length(min = 1, message = "Target field is required"))]
    pub target_field_name: String,
    pub transformation: Option<String>,
}

impl From<CreateMappingRequest> for NewSchemaMapping {
    fn from(request: CreateMappingRequest) -> Self {
        Self {
            source_field_name: request.source_field_name,
            target_field_name: request.target_field_name,
            transformation: request.transformation.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateParsingConfigRequest {
    #[serde(default = "default_file_type")]
    #[validate(length(min = 1, max = 32))]
    pub file_type: String,
    #[serde(default = "default_true")]
    pub has_header_row: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_quote_char")]
    pub quote_char: String,
    pub date_format: Option<String>,
    pub time_format: Option<String>,
    #[serde(default = "default_number_format")]
    pub number_format: String,
}

impl From<CreateParsingConfigRequest> for NewParsingConfig {
    fn from(request: CreateParsingConfigRequest) -> Self {
        Self {
            file_type: request.file_type,
            has_header_row: request.has_header_row,
            delimiter: request.delimiter,
            quote_char: request.quote_char,
            date_format: request.date_format,
            time_format: request.time_format,
            number_format: request.number_format,
        }
    }
}

// ============================================================================
// Data sources, rules and match sets
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDataSourceRequest {
    #[validate(length(min = 1, max = 255, message = "Data source name cannot be empty"))]
    pub name: String,
    pub description: Option<String>,
    pub schema_id: Option<Uuid>,
    pub schema_definition: Option<SchemaDefinition>,
    #[validate(length(equal = 3, message = "Currency must be a three-letter code"))]
    pub default_currency: Option<String>,
}

impl From<CreateDataSourceRequest> for NewDataSource {
    fn from(request: CreateDataSourceRequest) -> Self {
        Self {
            name: request.name,
            description: request.description,
            schema_id: request.schema_id,
            schema_definition: request.schema_definition,
            default_currency: request.default_currency,
            created_by: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMatchRuleRequest {
    #[validate(length(min = 1, max = 255, message = "Rule name cannot be empty"))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub match_by_amount: bool,
    #[serde(default)]
    pub match_by_date: bool,
    #[serde(default)]
    #[validate(range(min = 0, max = 366, message = "Tolerance must be between 0 and 366 days"))]
    pub date_tolerance_days: i32,
    #[serde(default)]
    pub match_by_reference: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl From<CreateMatchRuleRequest> for NewMatchRule {
    fn from(request: CreateMatchRuleRequest) -> Self {
        Self {
            name: request.name,
            description: request.description,
            match_by_amount: request.match_by_amount,
            match_by_date: request.match_by_date,
            date_tolerance_days: request.date_tolerance_days,
            match_by_reference: request.match_by_reference,
            active: request.active,
            created_by: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMatchSetRequest {
    #[validate(length(min = 1, max = 255, message = "Match set name cannot be empty"))]
    pub name: String,
    pub description: Option<String>,
    pub match_rule_id: Uuid,
    #[validate(length(min = 2, message = "At least two data sources are required"))]
    pub data_source_ids: Vec<Uuid>,
}

impl From<CreateMatchSetRequest> for NewMatchSet {
    fn from(request: CreateMatchSetRequest) -> Self {
        Self {
            name: request.name,
            description: request.description,
            match_rule_id: request.match_rule_id,
            data_source_ids: request.data_source_ids,
            created_by: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_config_defaults() {
        let request: CreateParsingConfigRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.file_type, "csv");
        assert!(request.has_header_row);
        assert_eq!(request.delimiter, ",");
        assert_eq!(request.quote_char, "\"");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_match_set_needs_two_sources() {
        let request = CreateMatchSetRequest {
            name: "bank vs ledger".to_string(),
            description: None,
            match_rule_id: Uuid::new_v4(),
            data_source_ids: vec![Uuid::new_v4()],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_negative_tolerance_is_invalid() {
        let request: CreateMatchRuleRequest =
            serde_json::from_str(r#"{"name":"r","match_by_date":true,"date_tolerance_days":-1}"#)
                .unwrap();
        assert!(request.validate().is_err());
    }
}
