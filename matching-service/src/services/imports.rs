//! Transaction imports: parsing configuration, mapping resolution,
//! normalization and persistence of every row outcome.

use crate::config::ImportConfig;
use crate::middleware::tenant::TenantContext;
use crate::models::{DataSource, ImportRecord, ImportStatus, RawTransaction, Transaction};
use crate::services::amount::NumberFormat;
use crate::services::capability::{Capability, CapabilityChecker};
use crate::services::ingestion::{
    parse_separator, resolve_mapping, suggest_column_mappings, CsvOptions, CsvRowSource,
    NormalizeOptions, Normalizer, RowSource,
};
use crate::services::metrics;
use crate::services::repository::{NewImport, NormalizedRow, Repository};
use serde::Serialize;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

pub const DEFAULT_FILE_TYPE: &str = "csv";

/// Per-request parsing overrides; anything left unset comes from the
/// parsing config registered for the data source's schema.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub data_source_id: Uuid,
    pub file_name: String,
    pub content: String,
    pub file_type: Option<String>,
    pub has_header_row: Option<bool>,
    pub delimiter: Option<String>,
    pub quote_char: Option<String>,
    pub date_format: Option<String>,
    pub number_format: Option<String>,
    /// Canonical field -> zero-based column index.
    pub column_mappings: Option<BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    pub row_number: i32,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub import: ImportRecord,
    pub row_errors: Vec<RowError>,
}

#[derive(Debug, Clone)]
struct ParsingPlan {
    csv: CsvOptions,
    normalize: NormalizeOptions,
}

/// Number of data rows returned with a mapping suggestion.
pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct MappingSuggestion {
    pub headers: Vec<String>,
    /// Canonical field name -> zero-based column index.
    pub column_mappings: BTreeMap<String, usize>,
    pub preview: Vec<Vec<String>>,
}

/// Reads up to `PREVIEW_ROWS` rows, skipping ones that cannot be read.
fn preview_rows<S: RowSource>(source: &mut S) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(PREVIEW_ROWS);
    while rows.len() < PREVIEW_ROWS {
        match source.next_record() {
            Some(Ok(row)) => rows.push(row),
            Some(Err(_)) => continue,
            None => break,
        }
    }
    rows
}

#[derive(Clone)]
pub struct ImportService {
    repo: Arc<dyn Repository>,
    checker: CapabilityChecker,
    config: ImportConfig,
}

impl ImportService {
    pub fn new(repo: Arc<dyn Repository>, checker: CapabilityChecker, config: ImportConfig) -> Self {
        Self {
            repo,
            checker,
            config,
        }
    }

    async fn parsing_plan(
        &self,
        tenant_id: Uuid,
        data_source: &DataSource,
        request: &ImportRequest,
    ) -> Result<ParsingPlan, AppError> {
        let file_type = request
            .file_type
            .as_deref()
            .unwrap_or(DEFAULT_FILE_TYPE)
            .trim()
            .to_ascii_lowercase();

        let stored = match data_source.schema_id {
            Some(schema_id) => {
                self.repo
                    .get_parsing_config(tenant_id, schema_id, &file_type)
                    .await?
            }
            None => None,
        };

        let mut csv = CsvOptions::default();
        let mut date_format = data_source
            .schema_definition
            .as_ref()
            .and_then(|d| d.date_format.clone());
        let mut number_format = NumberFormat::default();

        if let Some(stored) = &stored {
            csv.has_header_row = stored.has_header_row;
            csv.delimiter = parse_separator(&stored.delimiter, "delimiter")?;
            csv.quote = parse_separator(&stored.quote_char, "quote_char")?;
            date_format = stored.date_format.clone().or(date_format);
            number_format = NumberFormat::from_str(&stored.number_format);
        }

        if let Some(has_header_row) = request.has_header_row {
            csv.has_header_row = has_header_row;
        }
        if let Some(delimiter) = request.delimiter.as_deref() {
            csv.delimiter = parse_separator(delimiter, "delimiter")?;
        }
        if let Some(quote) = request.quote_char.as_deref() {
            csv.quote = parse_separator(quote, "quote_char")?;
        }
        if let Some(format) = request.date_format.as_deref().filter(|f| !f.trim().is_empty()) {
            date_format = Some(format.to_string());
        }
        if let Some(format) = request.number_format.as_deref() {
            number_format = NumberFormat::from_str(format);
        }

        let default_currency = data_source
            .default_currency
            .clone()
            .unwrap_or_else(|| self.config.default_currency.clone());

        Ok(ParsingPlan {
            csv,
            normalize: NormalizeOptions {
                date_format,
                number_format,
                default_currency,
            },
        })
    }

    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id, data_source_id = %request.data_source_id, bytes = request.content.len()))]
    pub async fn import_transactions(
        &self,
        ctx: &TenantContext,
        request: ImportRequest,
    ) -> Result<ImportResult, AppError> {
        self.checker
            .require(ctx, Capability::ImportTransactions)
            .await?;

        if request.content.len() > self.config.max_bytes {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "File exceeds the {} byte import limit",
                self.config.max_bytes
            )));
        }

        let data_source = self
            .repo
            .get_data_source(ctx.tenant_id, request.data_source_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Data source not found")))?;

        let plan = self.parsing_plan(ctx.tenant_id, &data_source, &request).await?;
        let schema_mappings = match data_source.schema_id {
            Some(schema_id) => {
                self.repo
                    .list_schema_mappings(ctx.tenant_id, schema_id)
                    .await?
            }
            None => Vec::new(),
        };

        let rows: Vec<NormalizedRow> = {
            let source = CsvRowSource::new(request.content.as_bytes(), plan.csv);
            let mapping = resolve_mapping(
                source.headers(),
                request.column_mappings.as_ref(),
                &schema_mappings,
                data_source.schema_definition.as_ref().map(|d| &d.0),
            )?;
            Normalizer::new(source, mapping, plan.normalize).collect()
        };

        let import = self
            .repo
            .create_import(
                ctx.tenant_id,
                NewImport {
                    data_source_id: data_source.data_source_id,
                    file_name: request.file_name.clone(),
                    file_size: request.content.len() as i64,
                    imported_by: ctx.user_id.clone(),
                },
            )
            .await?;

        let row_errors: Vec<RowError> = rows
            .iter()
            .filter_map(|row| {
                row.outcome.as_ref().err().map(|e| RowError {
                    row_number: row.row_number,
                    error: e.clone(),
                })
            })
            .collect();

        let completed = match self
            .repo
            .complete_import(ctx.tenant_id, import.import_id, rows)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(import_id = %import.import_id, error = %e, "Import could not be stored");
                metrics::record_import(ImportStatus::Failed.as_str(), 0, 0);
                if let Err(mark) = self
                    .repo
                    .fail_import(ctx.tenant_id, import.import_id, "Import could not be stored")
                    .await
                {
                    error!(error = %mark, "Failed to mark import as failed");
                }
                return Err(e);
            }
        };

        metrics::record_import(
            &completed.status,
            completed.success_count,
            completed.error_count,
        );
        info!(
            import_id = %completed.import_id,
            row_count = completed.row_count,
            success_count = completed.success_count,
            error_count = completed.error_count,
            status = %completed.status,
            "Import finished"
        );

        Ok(ImportResult {
            import: completed,
            row_errors,
        })
    }

    /// Suggests a column mapping from explicit headers or from the first row
    /// of `content`, with the first few data rows for preview.
    pub async fn suggest_mapping(
        &self,
        ctx: &TenantContext,
        headers: Option<Vec<String>>,
        content: Option<String>,
    ) -> Result<MappingSuggestion, AppError> {
        self.checker
            .require(ctx, Capability::ImportTransactions)
            .await?;

        let (headers, preview) = match (headers, content) {
            (Some(headers), content) => {
                let preview = content
                    .map(|c| {
                        preview_rows(&mut CsvRowSource::new(c.as_bytes(), CsvOptions::default()))
                    })
                    .unwrap_or_default();
                (headers, preview)
            }
            (None, Some(content)) => {
                let mut source = CsvRowSource::new(content.as_bytes(), CsvOptions::default());
                let headers = source.headers().to_vec();
                (headers, preview_rows(&mut source))
            }
            (None, None) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Either headers or content is required"
                )))
            }
        };

        Ok(MappingSuggestion {
            column_mappings: suggest_column_mappings(&headers),
            headers,
            preview,
        })
    }

    pub async fn get_import(
        &self,
        ctx: &TenantContext,
        import_id: Uuid,
    ) -> Result<ImportRecord, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.repo
            .get_import(ctx.tenant_id, import_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Import not found")))
    }

    pub async fn list_raw_transactions(
        &self,
        ctx: &TenantContext,
        import_id: Uuid,
    ) -> Result<Vec<RawTransaction>, AppError> {
        // NotFound for foreign imports too.
        self.get_import(ctx, import_id).await?;
        self.repo
            .list_raw_transactions(ctx.tenant_id, import_id)
            .await
    }

    pub async fn get_transaction(
        &self,
        ctx: &TenantContext,
        transaction_id: Uuid,
    ) -> Result<Transaction, AppError> {
        self.checker
            .require(ctx, Capability::ViewReconciliation)
            .await?;
        self.repo
            .get_transaction(ctx.tenant_id, transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))
    }
}
