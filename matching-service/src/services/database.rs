//! PostgreSQL repository for matching-service.

use crate::models::{
    DataSource, DataSourceSchema, FileParsingConfig, ImportRecord, ImportStatus, MatchDetail,
    MatchRule, MatchSet, MatchStatus, MatchType, RawTransaction, Role, RunStatus, SchemaField,
    SchemaMapping, Transaction, TransactionMatch, TransactionStatus, UnmatchedTransaction,
};
use crate::services::memory::no_rows_message;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{
    CommitOutcome, Decision, MatchFilter, MatchSetCounts, NewDataSource, NewImport,
    NewMatchRule, NewMatchSet, NewParsingConfig, NewSchema, NewSchemaField, NewSchemaMapping,
    NormalizedRow, Repository, RunCommit, RunOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgConnection;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "transaction_id, tenant_id, data_source_id, import_id, transaction_date, post_date, description, reference, amount, currency, status, created_by, created_utc, updated_utc";

const MATCH_COLUMNS: &str = "match_id, tenant_id, match_set_id, match_group_id, match_status, match_type, transaction_ids, match_rule_id, run_id, score, matched_by, approved_by, approval_date, rejection_reason, created_utc";

const MATCH_SET_COLUMNS: &str = r#"
    ms.match_set_id, ms.tenant_id, ms.name, ms.description, ms.match_rule_id,
    ARRAY(
        SELECT msd.data_source_id FROM match_set_data_sources msd
        WHERE msd.match_set_id = ms.match_set_id
        ORDER BY msd.position
    ) AS data_source_ids,
    ms.run_status, ms.current_run_id, ms.run_started_utc, ms.run_finished_utc,
    ms.last_run_error, ms.last_run_matched_groups, ms.last_run_unmatched,
    ms.created_by, ms.created_utc
"#;

const IMPORT_COLUMNS: &str = "import_id, tenant_id, data_source_id, file_name, file_size, imported_by, row_count, success_count, error_count, status, error_message, created_utc, completed_utc";

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", context, e))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "matching-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_match_set(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<Option<MatchSet>, AppError> {
        sqlx::query_as::<_, MatchSet>(&format!(
            "SELECT {} FROM match_sets ms WHERE ms.tenant_id = $1 AND ms.match_set_id = $2",
            MATCH_SET_COLUMNS
        ))
        .bind(tenant_id)
        .bind(match_set_id)
        .fetch_optional(conn)
        .await
        .map_err(db_error("get match set"))
    }

    async fn fetch_members(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> Result<Vec<Transaction>, AppError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE tenant_id = $1 AND transaction_id = ANY($2) ORDER BY array_position($2, transaction_id)",
            TRANSACTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(transaction_ids)
        .fetch_all(conn)
        .await
        .map_err(db_error("load match members"))
    }

    /// Flips `transaction_ids` to matched and records the match. Returns
    /// `None` when any member was no longer unmatched; the caller owns the
    /// rollback.
    #[allow(clippy::too_many_arguments)]
    async fn insert_match(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        match_set_id: Uuid,
        transaction_ids: &[Uuid],
        match_type: MatchType,
        rule_run_score: Option<(Uuid, Uuid, f64)>,
        matched_by: &str,
    ) -> Result<Option<TransactionMatch>, AppError> {
        let flipped = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND transaction_id = ANY($2) AND status = $4
            "#,
        )
        .bind(tenant_id)
        .bind(transaction_ids)
        .bind(TransactionStatus::Matched.as_str())
        .bind(TransactionStatus::Unmatched.as_str())
        .execute(&mut *conn)
        .await
        .map_err(db_error("flip transaction status"))?;

        if flipped.rows_affected() != transaction_ids.len() as u64 {
            return Ok(None);
        }

        let m = sqlx::query_as::<_, TransactionMatch>(&format!(
            r#"
            INSERT INTO transaction_matches (match_id, tenant_id, match_set_id, match_group_id, match_status, match_type, transaction_ids, match_rule_id, run_id, score, matched_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            MATCH_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(match_set_id)
        .bind(Uuid::new_v4())
        .bind(MatchStatus::Pending.as_str())
        .bind(match_type.as_str())
        .bind(transaction_ids)
        .bind(rule_run_score.map(|(rule, _, _)| rule))
        .bind(rule_run_score.map(|(_, run, _)| run))
        .bind(rule_run_score.map(|(_, _, score)| score))
        .bind(matched_by)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error("create match"))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO matched_transactions (match_set_id, transaction_id, match_group_id, match_id, tenant_id)
            SELECT $1, UNNEST($2::uuid[]), $3, $4, $5
            "#,
        )
        .bind(match_set_id)
        .bind(transaction_ids)
        .bind(m.match_group_id)
        .bind(m.match_id)
        .bind(tenant_id)
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => return Err(db_error("record matched transactions")(e)),
        }

        sqlx::query(
            "DELETE FROM unmatched_transactions WHERE match_set_id = $1 AND transaction_id = ANY($2)",
        )
        .bind(match_set_id)
        .bind(transaction_ids)
        .execute(&mut *conn)
        .await
        .map_err(db_error("clear unmatched rows"))?;

        Ok(Some(m))
    }
}

#[async_trait]
impl Repository for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Schema Registry Operations
    // =========================================================================

    #[instrument(skip(self, schema), fields(tenant_id = %tenant_id))]
    async fn create_schema(
        &self,
        tenant_id: Uuid,
        schema: NewSchema,
    ) -> Result<DataSourceSchema, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_schema"])
            .start_timer();

        let record = sqlx::query_as::<_, DataSourceSchema>(
            r#"
            INSERT INTO data_source_schemas (schema_id, tenant_id, name, description, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING schema_id, tenant_id, name, description, created_by, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&schema.name)
        .bind(&schema.description)
        .bind(&schema.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create schema: {}", e)))?;

        timer.observe_duration();
        info!(schema_id = %record.schema_id, "Schema created");
        Ok(record)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, schema_id = %schema_id))]
    async fn get_schema(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Option<DataSourceSchema>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_schema"])
            .start_timer();

        let record = sqlx::query_as::<_, DataSourceSchema>(
            r#"
            SELECT schema_id, tenant_id, name, description, created_by, created_utc
            FROM data_source_schemas
            WHERE tenant_id = $1 AND schema_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(schema_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get schema"))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self, field), fields(tenant_id = %tenant_id, schema_id = %schema_id))]
    async fn add_schema_field(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        field: NewSchemaField,
    ) -> Result<SchemaField, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_schema_field"])
            .start_timer();

        let record = sqlx::query_as::<_, SchemaField>(
            r#"
            INSERT INTO schema_fields (field_id, schema_id, tenant_id, name, display_name, field_type, required, default_value, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING field_id, schema_id, tenant_id, name, display_name, field_type, required, default_value, position
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(schema_id)
        .bind(tenant_id)
        .bind(&field.name)
        .bind(&field.display_name)
        .bind(&field.field_type)
        .bind(field.required)
        .bind(&field.default_value)
        .bind(field.position)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!(
                    "Field '{}' already exists on schema",
                    field.name
                ))
            } else {
                db_error("add schema field")(e)
            }
        })?;

        timer.observe_duration();
        Ok(record)
    }

    async fn list_schema_fields(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Vec<SchemaField>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_schema_fields"])
            .start_timer();

        let fields = sqlx::query_as::<_, SchemaField>(
            r#"
            SELECT field_id, schema_id, tenant_id, name, display_name, field_type, required, default_value, position
            FROM schema_fields
            WHERE tenant_id = $1 AND schema_id = $2
            ORDER BY position, name
            "#,
        )
        .bind(tenant_id)
        .bind(schema_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list schema fields"))?;

        timer.observe_duration();
        Ok(fields)
    }

    #[instrument(skip(self, mapping), fields(tenant_id = %tenant_id, schema_id = %schema_id))]
    async fn create_schema_mapping(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        mapping: NewSchemaMapping,
    ) -> Result<SchemaMapping, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_schema_mapping"])
            .start_timer();

        let record = sqlx::query_as::<_, SchemaMapping>(
            r#"
            INSERT INTO schema_mappings (mapping_id, schema_id, tenant_id, source_field_name, target_field_name, transformation)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING mapping_id, schema_id, tenant_id, source_field_name, target_field_name, transformation, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(schema_id)
        .bind(tenant_id)
        .bind(&mapping.source_field_name)
        .bind(&mapping.target_field_name)
        .bind(&mapping.transformation)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!(
                    "Source field '{}' is already mapped",
                    mapping.source_field_name
                ))
            } else {
                db_error("create schema mapping")(e)
            }
        })?;

        timer.observe_duration();
        Ok(record)
    }

    async fn list_schema_mappings(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
    ) -> Result<Vec<SchemaMapping>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_schema_mappings"])
            .start_timer();

        let mappings = sqlx::query_as::<_, SchemaMapping>(
            r#"
            SELECT mapping_id, schema_id, tenant_id, source_field_name, target_field_name, transformation, created_utc
            FROM schema_mappings
            WHERE tenant_id = $1 AND schema_id = $2
            ORDER BY created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(schema_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list schema mappings"))?;

        timer.observe_duration();
        Ok(mappings)
    }

    #[instrument(skip(self, config), fields(tenant_id = %tenant_id, schema_id = %schema_id))]
    async fn create_parsing_config(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        config: NewParsingConfig,
    ) -> Result<FileParsingConfig, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_parsing_config"])
            .start_timer();

        let record = sqlx::query_as::<_, FileParsingConfig>(
            r#"
            INSERT INTO file_parsing_configs (config_id, schema_id, tenant_id, file_type, has_header_row, delimiter, quote_char, date_format, time_format, number_format)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING config_id, schema_id, tenant_id, file_type, has_header_row, delimiter, quote_char, date_format, time_format, number_format, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(schema_id)
        .bind(tenant_id)
        .bind(&config.file_type)
        .bind(config.has_header_row)
        .bind(&config.delimiter)
        .bind(&config.quote_char)
        .bind(&config.date_format)
        .bind(&config.time_format)
        .bind(&config.number_format)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!(
                    "Parsing config for file type '{}' already exists",
                    config.file_type
                ))
            } else {
                db_error("create parsing config")(e)
            }
        })?;

        timer.observe_duration();
        Ok(record)
    }

    async fn get_parsing_config(
        &self,
        tenant_id: Uuid,
        schema_id: Uuid,
        file_type: &str,
    ) -> Result<Option<FileParsingConfig>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_parsing_config"])
            .start_timer();

        let record = sqlx::query_as::<_, FileParsingConfig>(
            r#"
            SELECT config_id, schema_id, tenant_id, file_type, has_header_row, delimiter, quote_char, date_format, time_format, number_format, created_utc
            FROM file_parsing_configs
            WHERE tenant_id = $1 AND schema_id = $2 AND file_type = $3
            "#,
        )
        .bind(tenant_id)
        .bind(schema_id)
        .bind(file_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get parsing config"))?;

        timer.observe_duration();
        Ok(record)
    }

    // =========================================================================
    // Configuration Operations
    // =========================================================================

    #[instrument(skip(self, data_source), fields(tenant_id = %tenant_id))]
    async fn create_data_source(
        &self,
        tenant_id: Uuid,
        data_source: NewDataSource,
    ) -> Result<DataSource, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_data_source"])
            .start_timer();

        let record = sqlx::query_as::<_, DataSource>(
            r#"
            INSERT INTO data_sources (data_source_id, tenant_id, name, description, schema_id, schema_definition, default_currency, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING data_source_id, tenant_id, name, description, schema_id, schema_definition, default_currency, created_by, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&data_source.name)
        .bind(&data_source.description)
        .bind(data_source.schema_id)
        .bind(data_source.schema_definition.map(Json))
        .bind(&data_source.default_currency)
        .bind(&data_source.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("create data source"))?;

        timer.observe_duration();
        info!(data_source_id = %record.data_source_id, "Data source created");
        Ok(record)
    }

    async fn get_data_source(
        &self,
        tenant_id: Uuid,
        data_source_id: Uuid,
    ) -> Result<Option<DataSource>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_data_source"])
            .start_timer();

        let record = sqlx::query_as::<_, DataSource>(
            r#"
            SELECT data_source_id, tenant_id, name, description, schema_id, schema_definition, default_currency, created_by, created_utc
            FROM data_sources
            WHERE tenant_id = $1 AND data_source_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(data_source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get data source"))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self, rule), fields(tenant_id = %tenant_id))]
    async fn create_match_rule(
        &self,
        tenant_id: Uuid,
        rule: NewMatchRule,
    ) -> Result<MatchRule, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_match_rule"])
            .start_timer();

        let record = sqlx::query_as::<_, MatchRule>(
            r#"
            INSERT INTO match_rules (match_rule_id, tenant_id, name, description, match_by_amount, match_by_date, date_tolerance_days, match_by_reference, active, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING match_rule_id, tenant_id, name, description, match_by_amount, match_by_date, date_tolerance_days, match_by_reference, active, created_by, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.match_by_amount)
        .bind(rule.match_by_date)
        .bind(rule.date_tolerance_days)
        .bind(rule.match_by_reference)
        .bind(rule.active)
        .bind(&rule.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("create match rule"))?;

        timer.observe_duration();
        info!(match_rule_id = %record.match_rule_id, "Match rule created");
        Ok(record)
    }

    async fn get_match_rule(
        &self,
        tenant_id: Uuid,
        match_rule_id: Uuid,
    ) -> Result<Option<MatchRule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_match_rule"])
            .start_timer();

        let record = sqlx::query_as::<_, MatchRule>(
            r#"
            SELECT match_rule_id, tenant_id, name, description, match_by_amount, match_by_date, date_tolerance_days, match_by_reference, active, created_by, created_utc
            FROM match_rules
            WHERE tenant_id = $1 AND match_rule_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(match_rule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get match rule"))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self, match_set), fields(tenant_id = %tenant_id))]
    async fn create_match_set(
        &self,
        tenant_id: Uuid,
        match_set: NewMatchSet,
    ) -> Result<MatchSet, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_match_set"])
            .start_timer();

        let match_set_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        sqlx::query(
            r#"
            INSERT INTO match_sets (match_set_id, tenant_id, name, description, match_rule_id, run_status, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(match_set_id)
        .bind(tenant_id)
        .bind(&match_set.name)
        .bind(&match_set.description)
        .bind(match_set.match_rule_id)
        .bind(RunStatus::Idle.as_str())
        .bind(&match_set.created_by)
        .execute(&mut *tx)
        .await
        .map_err(db_error("create match set"))?;

        let positions: Vec<i32> = (0..match_set.data_source_ids.len() as i32).collect();
        sqlx::query(
            r#"
            INSERT INTO match_set_data_sources (match_set_id, data_source_id, position)
            SELECT $1, d.id, d.position FROM UNNEST($2::uuid[], $3::int[]) AS d(id, position)
            "#,
        )
        .bind(match_set_id)
        .bind(&match_set.data_source_ids)
        .bind(&positions)
        .execute(&mut *tx)
        .await
        .map_err(db_error("link match set data sources"))?;

        let record = Self::fetch_match_set(&mut tx, tenant_id, match_set_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Match set vanished")))?;

        tx.commit().await.map_err(db_error("commit match set"))?;

        timer.observe_duration();
        info!(match_set_id = %match_set_id, "Match set created");
        Ok(record)
    }

    async fn get_match_set(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<Option<MatchSet>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_match_set"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;
        let record = Self::fetch_match_set(&mut conn, tenant_id, match_set_id).await?;

        timer.observe_duration();
        Ok(record)
    }

    // =========================================================================
    // Import Operations
    // =========================================================================

    #[instrument(skip(self, import), fields(tenant_id = %tenant_id, data_source_id = %import.data_source_id))]
    async fn create_import(
        &self,
        tenant_id: Uuid,
        import: NewImport,
    ) -> Result<ImportRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_import"])
            .start_timer();

        let record = sqlx::query_as::<_, ImportRecord>(&format!(
            r#"
            INSERT INTO import_records (import_id, tenant_id, data_source_id, file_name, file_size, imported_by, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            IMPORT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(import.data_source_id)
        .bind(&import.file_name)
        .bind(import.file_size)
        .bind(&import.imported_by)
        .bind(ImportStatus::Processing.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("create import"))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self, rows), fields(tenant_id = %tenant_id, import_id = %import_id, rows = rows.len()))]
    async fn complete_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
        rows: Vec<NormalizedRow>,
    ) -> Result<ImportRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_import"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        let import = sqlx::query_as::<_, ImportRecord>(&format!(
            "SELECT {} FROM import_records WHERE tenant_id = $1 AND import_id = $2",
            IMPORT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(import_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("get import"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Import not found")))?;

        // Serializes imports into the same data source until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(import.data_source_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error("lock data source"))?;

        let (mut success, mut errors) = (0i32, 0i32);
        for row in &rows {
            let (transaction_id, error_message) = match &row.outcome {
                Ok(new) => {
                    let id = Uuid::new_v4();
                    sqlx::query(
                        r#"
                        INSERT INTO transactions (transaction_id, tenant_id, data_source_id, import_id, transaction_date, post_date, description, reference, amount, currency, status, created_by)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                        "#,
                    )
                    .bind(id)
                    .bind(tenant_id)
                    .bind(import.data_source_id)
                    .bind(import_id)
                    .bind(new.transaction_date)
                    .bind(new.post_date)
                    .bind(&new.description)
                    .bind(&new.reference)
                    .bind(new.amount)
                    .bind(&new.currency)
                    .bind(TransactionStatus::Unmatched.as_str())
                    .bind(&import.imported_by)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("insert transaction"))?;
                    success += 1;
                    (Some(id), None)
                }
                Err(message) => {
                    errors += 1;
                    (None, Some(message.as_str()))
                }
            };

            sqlx::query(
                r#"
                INSERT INTO raw_transactions (raw_transaction_id, import_id, tenant_id, row_number, raw_data, error_message, transaction_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(import_id)
            .bind(tenant_id)
            .bind(row.row_number)
            .bind(Json(&row.raw_data))
            .bind(error_message)
            .bind(transaction_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("insert raw transaction"))?;
        }

        let (status, error_message) = if success > 0 {
            (ImportStatus::Completed, None)
        } else {
            (ImportStatus::Failed, Some(no_rows_message(rows.len())))
        };

        let record = sqlx::query_as::<_, ImportRecord>(&format!(
            r#"
            UPDATE import_records
            SET row_count = $3, success_count = $4, error_count = $5, status = $6, error_message = $7, completed_utc = NOW()
            WHERE tenant_id = $1 AND import_id = $2
            RETURNING {}
            "#,
            IMPORT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(import_id)
        .bind(rows.len() as i32)
        .bind(success)
        .bind(errors)
        .bind(status.as_str())
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("complete import"))?;

        tx.commit().await.map_err(db_error("commit import"))?;

        timer.observe_duration();
        info!(success, errors, "Import rows stored");
        Ok(record)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, import_id = %import_id))]
    async fn fail_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
        error_message: &str,
    ) -> Result<ImportRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_import"])
            .start_timer();

        let record = sqlx::query_as::<_, ImportRecord>(&format!(
            r#"
            UPDATE import_records
            SET status = $3, error_message = $4, completed_utc = NOW()
            WHERE tenant_id = $1 AND import_id = $2
            RETURNING {}
            "#,
            IMPORT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(import_id)
        .bind(ImportStatus::Failed.as_str())
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("fail import"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Import not found")))?;

        timer.observe_duration();
        Ok(record)
    }

    async fn get_import(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
    ) -> Result<Option<ImportRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_import"])
            .start_timer();

        let record = sqlx::query_as::<_, ImportRecord>(&format!(
            "SELECT {} FROM import_records WHERE tenant_id = $1 AND import_id = $2",
            IMPORT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(import_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get import"))?;

        timer.observe_duration();
        Ok(record)
    }

    async fn list_raw_transactions(
        &self,
        tenant_id: Uuid,
        import_id: Uuid,
    ) -> Result<Vec<RawTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_raw_transactions"])
            .start_timer();

        let rows = sqlx::query_as::<_, RawTransaction>(
            r#"
            SELECT raw_transaction_id, import_id, tenant_id, row_number, raw_data, error_message, transaction_id, created_utc
            FROM raw_transactions
            WHERE tenant_id = $1 AND import_id = $2
            ORDER BY row_number
            "#,
        )
        .bind(tenant_id)
        .bind(import_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list raw transactions"))?;

        timer.observe_duration();
        Ok(rows)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transaction"])
            .start_timer();

        let record = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE tenant_id = $1 AND transaction_id = $2",
            TRANSACTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get transaction"))?;

        timer.observe_duration();
        Ok(record)
    }

    async fn get_transactions(
        &self,
        tenant_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> Result<Vec<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transactions"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;
        let rows = Self::fetch_members(&mut conn, tenant_id, transaction_ids).await?;

        timer.observe_duration();
        Ok(rows)
    }

    #[instrument(skip(self, data_source_ids), fields(tenant_id = %tenant_id, sources = data_source_ids.len()))]
    async fn load_unmatched(
        &self,
        tenant_id: Uuid,
        data_source_ids: &[Uuid],
    ) -> Result<Vec<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_unmatched"])
            .start_timer();

        let rows = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE tenant_id = $1 AND data_source_id = ANY($2) AND status = $3
            ORDER BY transaction_date, transaction_id
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(data_source_ids)
        .bind(TransactionStatus::Unmatched.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load unmatched transactions"))?;

        timer.observe_duration();
        Ok(rows)
    }

    // =========================================================================
    // Run Operations
    // =========================================================================

    #[instrument(skip(self), fields(tenant_id = %tenant_id, match_set_id = %match_set_id, run_id = %run_id))]
    async fn try_start_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        run_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<MatchSet>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["try_start_run"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;

        let claimed = sqlx::query(
            r#"
            UPDATE match_sets
            SET run_status = $3, current_run_id = $4, run_started_utc = NOW(),
                run_finished_utc = NULL, last_run_error = NULL
            WHERE tenant_id = $1 AND match_set_id = $2
              AND (run_status <> $3 OR run_started_utc IS NULL OR run_started_utc < $5)
            "#,
        )
        .bind(tenant_id)
        .bind(match_set_id)
        .bind(RunStatus::Running.as_str())
        .bind(run_id)
        .bind(stale_before)
        .execute(&mut *conn)
        .await
        .map_err(db_error("start run"))?;

        let match_set = Self::fetch_match_set(&mut conn, tenant_id, match_set_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match set not found")))?;

        timer.observe_duration();

        if claimed.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(match_set))
    }

    #[instrument(skip(self, commit), fields(tenant_id = %tenant_id, match_set_id = %match_set_id, run_id = %commit.run_id, groups = commit.groups.len()))]
    async fn commit_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        commit: RunCommit,
    ) -> Result<CommitOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_run"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        let owner: Option<(Option<Uuid>, String)> = sqlx::query_as(
            "SELECT current_run_id, run_status FROM match_sets WHERE tenant_id = $1 AND match_set_id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(match_set_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("lock match set"))?;

        match owner {
            None => return Err(AppError::NotFound(anyhow::anyhow!("Match set not found"))),
            Some((current, status))
                if current != Some(commit.run_id)
                    || RunStatus::from_str(&status) != RunStatus::Running =>
            {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Run no longer owns the match set"
                )));
            }
            Some(_) => {}
        }

        let mut outcome = CommitOutcome::default();
        for group in &commit.groups {
            sqlx::query("SAVEPOINT run_group")
                .execute(&mut *tx)
                .await
                .map_err(db_error("create savepoint"))?;

            let created = Self::insert_match(
                &mut tx,
                tenant_id,
                match_set_id,
                &group.transaction_ids,
                MatchType::Automatic,
                Some((commit.match_rule_id, commit.run_id, group.score)),
                &commit.matched_by,
            )
            .await?;

            if created.is_some() {
                sqlx::query("RELEASE SAVEPOINT run_group")
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("release savepoint"))?;
                outcome.groups_created += 1;
                outcome.transactions_matched += group.transaction_ids.len() as i32;
            } else {
                sqlx::query("ROLLBACK TO SAVEPOINT run_group")
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("rollback savepoint"))?;
                warn!(members = group.transaction_ids.len(), "Skipping stale match group");
                outcome.stale_groups += 1;
            }
        }

        sqlx::query("DELETE FROM unmatched_transactions WHERE tenant_id = $1 AND match_set_id = $2")
            .bind(tenant_id)
            .bind(match_set_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("clear unmatched rows"))?;

        let ids: Vec<Uuid> = commit.unmatched.iter().map(|u| u.transaction_id).collect();
        let reasons: Vec<String> = commit.unmatched.iter().map(|u| u.reason.clone()).collect();
        let inserted = sqlx::query(
            r#"
            INSERT INTO unmatched_transactions (match_set_id, transaction_id, run_id, reason, tenant_id)
            SELECT $1, u.id, $2, u.reason, $3
            FROM UNNEST($4::uuid[], $5::text[]) AS u(id, reason)
            JOIN transactions t ON t.transaction_id = u.id AND t.tenant_id = $3 AND t.status = $6
            "#,
        )
        .bind(match_set_id)
        .bind(commit.run_id)
        .bind(tenant_id)
        .bind(&ids)
        .bind(&reasons)
        .bind(TransactionStatus::Unmatched.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error("record unmatched rows"))?;
        outcome.transactions_unmatched = inserted.rows_affected() as i32;

        tx.commit().await.map_err(db_error("commit run"))?;

        timer.observe_duration();
        Ok(outcome)
    }

    #[instrument(skip(self, outcome), fields(tenant_id = %tenant_id, match_set_id = %match_set_id, run_id = %run_id))]
    async fn finish_run(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        run_id: Uuid,
        outcome: RunOutcome,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["finish_run"])
            .start_timer();

        let (status, error, groups, unmatched) = match outcome {
            RunOutcome::Completed(summary) => (
                RunStatus::Completed,
                None,
                Some(summary.groups_created),
                Some(summary.transactions_unmatched),
            ),
            RunOutcome::Failed(message) => (RunStatus::Failed, Some(message), None, None),
        };

        sqlx::query(
            r#"
            UPDATE match_sets
            SET run_status = $4, run_finished_utc = NOW(), last_run_error = $5,
                last_run_matched_groups = COALESCE($6, last_run_matched_groups),
                last_run_unmatched = COALESCE($7, last_run_unmatched)
            WHERE tenant_id = $1 AND match_set_id = $2 AND current_run_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(match_set_id)
        .bind(run_id)
        .bind(status.as_str())
        .bind(error)
        .bind(groups)
        .bind(unmatched)
        .execute(&self.pool)
        .await
        .map_err(db_error("finish run"))?;

        timer.observe_duration();
        Ok(())
    }

    async fn match_set_counts(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<MatchSetCounts, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["match_set_counts"])
            .start_timer();

        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM transactions t
                 JOIN match_set_data_sources msd ON msd.data_source_id = t.data_source_id
                 WHERE msd.match_set_id = ms.match_set_id AND t.tenant_id = ms.tenant_id),
                (SELECT COUNT(*) FROM matched_transactions mt
                 WHERE mt.match_set_id = ms.match_set_id AND mt.tenant_id = ms.tenant_id),
                (SELECT COUNT(*) FROM transactions t
                 JOIN match_set_data_sources msd ON msd.data_source_id = t.data_source_id
                 WHERE msd.match_set_id = ms.match_set_id AND t.tenant_id = ms.tenant_id
                   AND t.status = $3)
            FROM match_sets ms
            WHERE ms.tenant_id = $1 AND ms.match_set_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(match_set_id)
        .bind(TransactionStatus::Unmatched.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("count match set transactions"))?;

        timer.observe_duration();

        let (total_transactions, matched_count, unmatched_count) =
            row.ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match set not found")))?;
        Ok(MatchSetCounts {
            total_transactions,
            matched_count,
            unmatched_count,
        })
    }

    // =========================================================================
    // Match Operations
    // =========================================================================

    #[instrument(skip(self, transaction_ids), fields(tenant_id = %tenant_id, match_set_id = %match_set_id, members = transaction_ids.len()))]
    async fn create_manual_match(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
        transaction_ids: &[Uuid],
        matched_by: &str,
    ) -> Result<MatchDetail, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_manual_match"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        if Self::fetch_match_set(&mut tx, tenant_id, match_set_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(anyhow::anyhow!("Match set not found")));
        }

        let m = Self::insert_match(
            &mut tx,
            tenant_id,
            match_set_id,
            transaction_ids,
            MatchType::Manual,
            None,
            matched_by,
        )
        .await?
        .ok_or_else(|| {
            AppError::Conflict(anyhow::anyhow!(
                "One or more transactions are already matched"
            ))
        })?;

        let transactions = Self::fetch_members(&mut tx, tenant_id, &m.transaction_ids).await?;
        tx.commit().await.map_err(db_error("commit manual match"))?;

        timer.observe_duration();
        info!(match_id = %m.match_id, "Manual match created");
        Ok(MatchDetail {
            transaction_match: m,
            transactions,
        })
    }

    async fn get_match(
        &self,
        tenant_id: Uuid,
        match_id: Uuid,
    ) -> Result<Option<MatchDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_match"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;
        let m = sqlx::query_as::<_, TransactionMatch>(&format!(
            "SELECT {} FROM transaction_matches WHERE tenant_id = $1 AND match_id = $2",
            MATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(match_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("get match"))?;

        let detail = match m {
            Some(m) => {
                let transactions =
                    Self::fetch_members(&mut conn, tenant_id, &m.transaction_ids).await?;
                Some(MatchDetail {
                    transaction_match: m,
                    transactions,
                })
            }
            None => None,
        };

        timer.observe_duration();
        Ok(detail)
    }

    #[instrument(skip(self, decision), fields(tenant_id = %tenant_id, match_id = %match_id))]
    async fn decide_match(
        &self,
        tenant_id: Uuid,
        match_id: Uuid,
        decision: Decision,
        decided_by: &str,
    ) -> Result<TransactionMatch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["decide_match"])
            .start_timer();

        let reason = match &decision {
            Decision::Approve => None,
            Decision::Reject { reason } => Some(reason.clone()),
        };

        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        let updated = sqlx::query_as::<_, TransactionMatch>(&format!(
            r#"
            UPDATE transaction_matches
            SET match_status = $3, approved_by = $4, approval_date = NOW(),
                rejection_reason = COALESCE($5, rejection_reason)
            WHERE tenant_id = $1 AND match_id = $2 AND match_status = $6
            RETURNING {}
            "#,
            MATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(match_id)
        .bind(decision.status().as_str())
        .bind(decided_by)
        .bind(&reason)
        .bind(MatchStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("decide match"))?;

        let updated = match updated {
            Some(m) => m,
            None => {
                let existing: Option<(String,)> = sqlx::query_as(
                    "SELECT match_status FROM transaction_matches WHERE tenant_id = $1 AND match_id = $2",
                )
                .bind(tenant_id)
                .bind(match_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("get match status"))?;

                return Err(match existing {
                    None => AppError::NotFound(anyhow::anyhow!("Match not found")),
                    Some((status,)) => AppError::Conflict(anyhow::anyhow!(
                        "Match is already {}",
                        MatchStatus::from_str(&status).as_str()
                    )),
                });
            }
        };

        if let Some(reason) = reason {
            sqlx::query("DELETE FROM matched_transactions WHERE match_id = $1")
                .bind(match_id)
                .execute(&mut *tx)
                .await
                .map_err(db_error("remove matched rows"))?;

            sqlx::query(
                r#"
                UPDATE transactions
                SET status = $3, updated_utc = NOW()
                WHERE tenant_id = $1 AND transaction_id = ANY($2)
                "#,
            )
            .bind(tenant_id)
            .bind(&updated.transaction_ids)
            .bind(TransactionStatus::Unmatched.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error("revert transaction status"))?;

            sqlx::query(
                r#"
                INSERT INTO unmatched_transactions (match_set_id, transaction_id, run_id, reason, tenant_id)
                SELECT $1, UNNEST($2::uuid[]), NULL, $3, $4
                ON CONFLICT (match_set_id, transaction_id)
                DO UPDATE SET reason = EXCLUDED.reason, run_id = NULL, created_utc = NOW()
                "#,
            )
            .bind(updated.match_set_id)
            .bind(&updated.transaction_ids)
            .bind(format!("match rejected: {}", reason))
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("record rejected transactions"))?;
        }

        tx.commit().await.map_err(db_error("commit decision"))?;

        timer.observe_duration();
        info!(status = %updated.match_status, "Match decided");
        Ok(updated)
    }

    async fn search_matches(
        &self,
        tenant_id: Uuid,
        filter: &MatchFilter,
    ) -> Result<Vec<TransactionMatch>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["search_matches"])
            .start_timer();

        let rows = sqlx::query_as::<_, TransactionMatch>(&format!(
            r#"
            SELECT {}
            FROM transaction_matches
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR match_set_id = $2)
              AND ($3::text IS NULL OR match_status = $3)
              AND ($4::text IS NULL OR match_type = $4)
              AND ($5::text IS NULL OR matched_by = $5)
              AND ($6::text IS NULL OR approved_by = $6)
            ORDER BY created_utc DESC, match_id
            LIMIT $7 OFFSET $8
            "#,
            MATCH_COLUMNS
        ))
        .bind(tenant_id)
        .bind(filter.match_set_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.match_type.map(|t| t.as_str()))
        .bind(&filter.matched_by)
        .bind(&filter.approved_by)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("search matches"))?;

        timer.observe_duration();
        Ok(rows)
    }

    async fn list_unmatched(
        &self,
        tenant_id: Uuid,
        match_set_id: Uuid,
    ) -> Result<Vec<UnmatchedTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_unmatched"])
            .start_timer();

        let rows = sqlx::query_as::<_, UnmatchedTransaction>(
            r#"
            SELECT match_set_id, transaction_id, run_id, reason, tenant_id, created_utc
            FROM unmatched_transactions
            WHERE tenant_id = $1 AND match_set_id = $2
            ORDER BY created_utc, transaction_id
            "#,
        )
        .bind(tenant_id)
        .bind(match_set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list unmatched transactions"))?;

        timer.observe_duration();
        Ok(rows)
    }

    // =========================================================================
    // Role Operations
    // =========================================================================

    async fn assign_role(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        role: Role,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO role_assignments (tenant_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("assign role"))?;
        Ok(())
    }

    async fn roles_for(&self, tenant_id: Uuid, user_id: &str) -> Result<Vec<Role>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["roles_for"])
            .start_timer();

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT role FROM role_assignments WHERE tenant_id = $1 AND user_id = $2 ORDER BY role",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load roles"))?;

        timer.observe_duration();
        Ok(rows.into_iter().filter_map(|(r,)| Role::parse(&r)).collect())
    }
}
