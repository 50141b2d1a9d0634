use crate::services::imports::ImportRequest;
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

/// CSV content posted inline.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportTransactionsRequest {
    #[validate(length(min = 1, max = 255, message = "File name cannot be empty"))]
    pub file_name: String,
    pub content: String,
    pub file_type: Option<String>,
    pub has_header_row: Option<bool>,
    pub delimiter: Option<String>,
    pub quote_char: Option<String>,
    pub date_format: Option<String>,
    pub number_format: Option<String>,
    /// Canonical field name -> zero-based column index.
    pub column_mappings: Option<BTreeMap<String, usize>>,
}

impl ImportTransactionsRequest {
    pub fn into_import(self, data_source_id: Uuid) -> ImportRequest {
        ImportRequest {
            data_source_id,
            file_name: self.file_name,
            content: self.content,
            file_type: self.file_type,
            has_header_row: self.has_header_row,
            delimiter: self.delimiter,
            quote_char: self.quote_char,
            date_format: self.date_format,
            number_format: self.number_format,
            column_mappings: self.column_mappings,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestMappingRequest {
    pub headers: Option<Vec<String>>,
    pub content: Option<String>,
}
