//! Ingestion normalizer.
//!
//! Turns a tabular source into canonical transactions. A bad row never stops
//! the import: it is reported with its error and the next row is read.

use crate::models::{SchemaDefinition, SchemaMapping};
use crate::services::amount::{parse_amount, NumberFormat};
use crate::services::repository::{NewTransaction, NormalizedRow};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::io::Read;
use thiserror::Error;

/// Why a single row could not become a transaction.
#[derive(Debug, Error, PartialEq)]
pub enum RowFailure {
    #[error("unreadable row: {0}")]
    Unreadable(String),
    #[error("{0}")]
    InvalidDate(String),
    #[error("missing column {column} for {field}")]
    MissingColumn { column: usize, field: &'static str },
    #[error("{0} is not mapped")]
    Unmapped(&'static str),
    #[error("invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },
    #[error("invalid currency '{0}'")]
    InvalidCurrency(String),
}

// ============================================================================
// Canonical fields
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalField {
    Date,
    PostDate,
    Description,
    Amount,
    Reference,
    Currency,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 6] = [
        Self::Date,
        Self::PostDate,
        Self::Description,
        Self::Amount,
        Self::Reference,
        Self::Currency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::PostDate => "postDate",
            Self::Description => "description",
            Self::Amount => "amount",
            Self::Reference => "reference",
            Self::Currency => "currency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "date" | "transaction_date" | "transactionDate" => Some(Self::Date),
            "postDate" | "post_date" => Some(Self::PostDate),
            "description" => Some(Self::Description),
            "amount" => Some(Self::Amount),
            "reference" => Some(Self::Reference),
            "currency" => Some(Self::Currency),
            _ => None,
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Self::Date | Self::Description | Self::Amount | Self::Reference
        )
    }
}

// ============================================================================
// Row sources
// ============================================================================

/// A header row plus a stream of string rows.
pub trait RowSource {
    fn headers(&self) -> &[String];
    /// `None` at end of input; `Some(Err)` for a row that could not be read.
    fn next_record(&mut self) -> Option<Result<Vec<String>, String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub has_header_row: bool,
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            has_header_row: true,
            delimiter: b',',
            quote: b'"',
        }
    }
}

/// Parses a configured delimiter or quote character.
pub fn parse_separator(value: &str, what: &str) -> Result<u8, AppError> {
    match value {
        "\\t" | "tab" | "\t" => return Ok(b'\t'),
        _ => {}
    }
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c as u8),
        _ => Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must be a single ASCII character",
            what
        ))),
    }
}

fn positional_name(index: usize) -> String {
    format!("column_{}", index + 1)
}

pub struct CsvRowSource<R: Read> {
    headers: Vec<String>,
    records: csv::StringRecordsIntoIter<R>,
    pending: Option<Result<Vec<String>, String>>,
}

impl<R: Read> CsvRowSource<R> {
    pub fn new(reader: R, options: CsvOptions) -> Self {
        let mut records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(options.delimiter)
            .quote(options.quote)
            .from_reader(reader)
            .into_records();

        let first = records.next().map(|r| {
            r.map(|rec| rec.iter().map(str::to_string).collect::<Vec<_>>())
                .map_err(|e| e.to_string())
        });

        let (headers, pending) = match first {
            Some(Ok(row)) if options.has_header_row => {
                (row.iter().map(|h| h.trim().to_string()).collect(), None)
            }
            Some(Ok(row)) => ((0..row.len()).map(positional_name).collect(), Some(Ok(row))),
            other => (Vec::new(), other),
        };

        Self {
            headers,
            records,
            pending,
        }
    }
}

impl<R: Read> RowSource for CsvRowSource<R> {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn next_record(&mut self) -> Option<Result<Vec<String>, String>> {
        if let Some(pending) = self.pending.take() {
            return Some(pending);
        }
        self.records.next().map(|r| {
            r.map(|rec| rec.iter().map(str::to_string).collect())
                .map_err(|e| e.to_string())
        })
    }
}

// ============================================================================
// Column mapping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Trim,
    Upper,
    Lower,
    Negate,
    Abs,
}

impl Transform {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trim" => Some(Self::Trim),
            "upper" | "uppercase" => Some(Self::Upper),
            "lower" | "lowercase" => Some(Self::Lower),
            "negate" => Some(Self::Negate),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    /// Parses a `|`-separated chain such as `trim|upper`.
    pub fn parse_chain(expr: &str) -> Result<Vec<Self>, AppError> {
        expr.split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Self::parse(s).ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!("Unknown transformation '{}'", s))
                })
            })
            .collect()
    }
}

/// Canonical field -> column index, plus per-field transformations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    pub columns: BTreeMap<CanonicalField, usize>,
    pub transforms: BTreeMap<CanonicalField, Vec<Transform>>,
}

impl ColumnMapping {
    pub fn column(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    fn missing_required(&self) -> Vec<&'static str> {
        CanonicalField::ALL
            .iter()
            .filter(|f| f.is_required() && !self.columns.contains_key(f))
            .map(|f| f.as_str())
            .collect()
    }
}

fn header_index(headers: &[String], name: &str) -> Option<usize> {
    let wanted = name.trim();
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(wanted))
}

/// Builds the mapping for an import.
///
/// An explicit mapping wins outright. Otherwise the schema's mappings are
/// matched against the header row, then the inline definition's defaults
/// fill the remaining fields. Every required field must end up mapped.
pub fn resolve_mapping(
    headers: &[String],
    explicit: Option<&BTreeMap<String, usize>>,
    schema_mappings: &[SchemaMapping],
    definition: Option<&SchemaDefinition>,
) -> Result<ColumnMapping, AppError> {
    let mut mapping = ColumnMapping::default();

    if let Some(explicit) = explicit.filter(|m| !m.is_empty()) {
        for (name, index) in explicit {
            let field = CanonicalField::parse(name).ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Unknown canonical field '{}'", name))
            })?;
            mapping.columns.insert(field, *index);
        }
    } else {
        for m in schema_mappings {
            let Some(field) = CanonicalField::parse(&m.target_field_name) else {
                continue;
            };
            if mapping.columns.contains_key(&field) {
                continue;
            }
            if let Some(index) = header_index(headers, &m.source_field_name) {
                mapping.columns.insert(field, index);
                if let Some(expr) = m.transformation.as_deref() {
                    mapping.transforms.insert(field, Transform::parse_chain(expr)?);
                }
            }
        }

        if let Some(definition) = definition {
            for (name, column) in &definition.default_mappings {
                let Some(field) = CanonicalField::parse(name) else {
                    continue;
                };
                if mapping.columns.contains_key(&field) {
                    continue;
                }
                if let Some(index) = header_index(headers, column) {
                    mapping.columns.insert(field, index);
                }
            }
        }
    }

    let missing = mapping.missing_required();
    if !missing.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Missing column mapping for required field(s): {}",
            missing.join(", ")
        )));
    }

    Ok(mapping)
}

/// Pre-fills a mapping from header names. Only a suggestion.
pub fn suggest_column_mappings(headers: &[String]) -> BTreeMap<String, usize> {
    fn bucket(header: &str) -> Option<CanonicalField> {
        let has = |needle: &str| header.contains(needle);
        if has("post") && has("date") {
            Some(CanonicalField::PostDate)
        } else if has("date") {
            Some(CanonicalField::Date)
        } else if has("desc") {
            Some(CanonicalField::Description)
        } else if has("amount") || has("sum") || has("value") || has("price") {
            Some(CanonicalField::Amount)
        } else if has("ref") || has("number") || has("id") || has("trans") {
            Some(CanonicalField::Reference)
        } else if has("curr") {
            Some(CanonicalField::Currency)
        } else {
            None
        }
    }

    let mut suggested = BTreeMap::new();
    for (index, header) in headers.iter().enumerate() {
        let lowered = header.trim().to_lowercase();
        if lowered.is_empty() {
            continue;
        }
        if let Some(field) = bucket(&lowered) {
            suggested
                .entry(field.as_str().to_string())
                .or_insert(index);
        }
    }
    suggested
}

// ============================================================================
// Cell parsing
// ============================================================================

/// Translates `YYYY-MM-DD` style and Go reference layouts into chrono syntax.
/// Formats that already contain `%` pass through.
pub fn to_chrono_format(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }
    if format.contains("2006") {
        return format
            .replace("2006", "%Y")
            .replace("Jan", "%b")
            .replace("01", "%m")
            .replace("02", "%d");
    }

    let chars: Vec<char> = format.chars().collect();
    let mut out = String::with_capacity(format.len() + 4);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        match (c.to_ascii_uppercase(), run) {
            ('Y', 4) => out.push_str("%Y"),
            ('Y', 2) => out.push_str("%y"),
            ('M', 3) => out.push_str("%b"),
            ('M', 1 | 2) => out.push_str("%m"),
            ('D', 1 | 2) => out.push_str("%d"),
            _ => {
                for _ in 0..run {
                    if c == '%' {
                        out.push_str("%%");
                    } else {
                        out.push(c);
                    }
                }
            }
        }
        i += run;
    }
    out
}

const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%d-%b-%Y",
    "%Y%m%d",
];

pub fn parse_date(raw: &str, format: Option<&str>) -> Result<NaiveDate, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("date is empty".to_string());
    }

    let try_formats = |candidate: &str| -> Option<NaiveDate> {
        match format {
            Some(f) => NaiveDate::parse_from_str(candidate, &to_chrono_format(f)).ok(),
            None => FALLBACK_DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(candidate, f).ok()),
        }
    };

    try_formats(value)
        .or_else(|| {
            // Timestamps: keep the date part.
            value
                .split(|c| c == 'T' || c == ' ')
                .next()
                .filter(|head| head.len() < value.len())
                .and_then(try_formats)
        })
        .ok_or_else(|| format!("invalid date '{}'", value))
}

fn apply_text_transforms(value: &str, transforms: &[Transform]) -> String {
    let mut out = value.to_string();
    for t in transforms {
        out = match t {
            Transform::Trim => out.trim().to_string(),
            Transform::Upper => out.to_uppercase(),
            Transform::Lower => out.to_lowercase(),
            Transform::Negate | Transform::Abs => out,
        };
    }
    out
}

// ============================================================================
// Normalizer
// ============================================================================

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub date_format: Option<String>,
    pub number_format: NumberFormat,
    /// Data source default, else service default.
    pub default_currency: String,
}

/// Lazily normalizes every non-blank row of a source.
pub struct Normalizer<S: RowSource> {
    source: S,
    mapping: ColumnMapping,
    options: NormalizeOptions,
    row_number: i32,
}

impl<S: RowSource> Normalizer<S> {
    pub fn new(source: S, mapping: ColumnMapping, options: NormalizeOptions) -> Self {
        Self {
            source,
            mapping,
            options,
            row_number: 0,
        }
    }

    fn raw_object(&self, cells: &[String]) -> Value {
        let headers = self.source.headers();
        let mut object = Map::new();
        for (index, cell) in cells.iter().enumerate() {
            let key = headers
                .get(index)
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| positional_name(index));
            object.insert(key, Value::String(cell.clone()));
        }
        Value::Object(object)
    }

    fn cell(&self, cells: &[String], field: CanonicalField) -> Result<Option<String>, RowFailure> {
        let Some(index) = self.mapping.column(field) else {
            return Ok(None);
        };
        let raw = cells
            .get(index)
            .ok_or(RowFailure::MissingColumn {
                column: index + 1,
                field: field.as_str(),
            })?;
        let transforms = self
            .mapping
            .transforms
            .get(&field)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Ok(Some(apply_text_transforms(raw, transforms)))
    }

    fn required_cell(&self, cells: &[String], field: CanonicalField) -> Result<String, RowFailure> {
        self.cell(cells, field)?
            .ok_or(RowFailure::Unmapped(field.as_str()))
    }

    fn normalize(&self, cells: &[String]) -> Result<NewTransaction, RowFailure> {
        let date_format = self.options.date_format.as_deref();

        let transaction_date = parse_date(
            &self.required_cell(cells, CanonicalField::Date)?,
            date_format,
        )
        .map_err(RowFailure::InvalidDate)?;

        let post_date = self
            .cell(cells, CanonicalField::PostDate)
            .ok()
            .flatten()
            .and_then(|raw| parse_date(&raw, date_format).ok())
            .unwrap_or(transaction_date);

        let description = self
            .required_cell(cells, CanonicalField::Description)?
            .trim()
            .to_string();
        let reference = self
            .required_cell(cells, CanonicalField::Reference)?
            .trim()
            .to_string();

        let raw_amount = self.required_cell(cells, CanonicalField::Amount)?;
        let mut amount = parse_amount(&raw_amount, self.options.number_format)
            .map_err(|reason| RowFailure::InvalidAmount {
                value: raw_amount.trim().to_string(),
                reason,
            })?;
        if let Some(transforms) = self.mapping.transforms.get(&CanonicalField::Amount) {
            for t in transforms {
                match t {
                    Transform::Negate => amount = -amount,
                    Transform::Abs => amount = amount.abs(),
                    _ => {}
                }
            }
        }

        let currency = match self.cell(cells, CanonicalField::Currency)? {
            Some(raw) if !raw.trim().is_empty() => {
                let code = raw.trim().to_ascii_uppercase();
                if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(RowFailure::InvalidCurrency(raw.trim().to_string()));
                }
                code
            }
            _ => self.options.default_currency.clone(),
        };

        Ok(NewTransaction {
            transaction_date,
            post_date,
            description,
            reference,
            amount,
            currency,
        })
    }
}

impl<S: RowSource> Iterator for Normalizer<S> {
    type Item = NormalizedRow;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.source.next_record()? {
                Err(e) => {
                    self.row_number += 1;
                    return Some(NormalizedRow {
                        row_number: self.row_number,
                        raw_data: Value::Object(Map::new()),
                        outcome: Err(RowFailure::Unreadable(e).to_string()),
                    });
                }
                Ok(cells) => {
                    if cells.iter().all(|c| c.trim().is_empty()) {
                        continue;
                    }
                    self.row_number += 1;
                    return Some(NormalizedRow {
                        row_number: self.row_number,
                        raw_data: self.raw_object(&cells),
                        outcome: self.normalize(&cells).map_err(|e| e.to_string()),
                    });
                }
            }
        }
    }
}
