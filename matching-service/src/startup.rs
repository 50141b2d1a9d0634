use crate::config::{MatchingConfig, RunMode, StoreBackend};
use crate::handlers;
use crate::services::executor::RunExecutor;
use crate::services::{
    ApprovalService, CapabilityChecker, ConfigurationService, Database, ImportService,
    MatchingOrchestrator, MemoryStore, Repository, RunQueue, SchemaRegistry,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: MatchingConfig,
    pub repo: Arc<dyn Repository>,
    pub configuration: ConfigurationService,
    pub schemas: SchemaRegistry,
    pub imports: ImportService,
    pub orchestrator: MatchingOrchestrator,
    pub approvals: ApprovalService,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
    run_queue: Option<RunQueue>,
}

impl Application {
    /// Connects the configured store (running migrations for Postgres) and
    /// binds the HTTP listener.
    pub async fn build(config: MatchingConfig) -> Result<Self, AppError> {
        let repo: Arc<dyn Repository> = match config.store {
            StoreBackend::Postgres => {
                let db_config = config.database.as_ref().ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "DATABASE_URL is required for the postgres store"
                    ))
                })?;
                let db = Database::new(
                    &db_config.url,
                    db_config.max_connections,
                    db_config.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to PostgreSQL: {}", e);
                    e
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!("Failed to run database migrations: {}", e);
                    e
                })?;
                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_repository(config, repo).await
    }

    pub async fn build_with_repository(
        config: MatchingConfig,
        repo: Arc<dyn Repository>,
    ) -> Result<Self, AppError> {
        let checker = CapabilityChecker::new(repo.clone(), config.auth.enforce);

        let run_queue = match config.runs.mode {
            RunMode::Queued => Some(RunQueue::start(
                RunExecutor::new(repo.clone(), config.runs.timeout()),
                config.runs.worker_count,
                config.runs.queue_size,
            )),
            RunMode::Inline => None,
        };

        let state = AppState {
            config: config.clone(),
            repo: repo.clone(),
            configuration: ConfigurationService::new(repo.clone(), checker.clone()),
            schemas: SchemaRegistry::new(repo.clone(), checker.clone()),
            imports: ImportService::new(repo.clone(), checker.clone(), config.imports.clone()),
            orchestrator: MatchingOrchestrator::new(
                repo.clone(),
                checker.clone(),
                config.runs.clone(),
                run_queue.clone(),
            ),
            approvals: ApprovalService::new(repo, checker),
        };

        let router = build_router(state.clone());

        let addr = config.common.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            store = config.store.as_str(),
            run_mode = config.runs.mode.as_str(),
            "Listening"
        );

        Ok(Self {
            port,
            listener,
            router,
            state,
            run_queue,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.port
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.state.repo.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Serves until `signal` resolves, then stops the run queue.
    pub async fn run_with_shutdown<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await;

        if let Some(queue) = self.run_queue {
            queue.shutdown().await;
        }
        result
    }
}

pub fn build_router(state: AppState) -> Router {
    // Import content travels JSON-escaped inside the request body.
    let body_limit = state
        .config
        .imports
        .max_bytes
        .saturating_mul(2)
        .saturating_add(64 * 1024);

    let api = Router::new()
        // Configuration
        .route("/data-sources", post(handlers::create_data_source))
        .route("/data-sources/:id", get(handlers::get_data_source))
        .route("/match-rules", post(handlers::create_match_rule))
        .route("/match-rules/:id", get(handlers::get_match_rule))
        .route("/match-sets", post(handlers::create_match_set))
        .route("/match-sets/:id", get(handlers::get_match_set))
        // Schema registry
        .route("/schemas", post(handlers::create_schema))
        .route("/schemas/:id", get(handlers::get_schema))
        .route("/schemas/:id/fields", post(handlers::add_schema_field))
        .route(
            "/schemas/:id/mappings",
            post(handlers::create_schema_mapping).get(handlers::list_schema_mappings),
        )
        .route(
            "/schemas/:id/parsing-configs",
            post(handlers::create_parsing_config),
        )
        .route(
            "/schemas/:id/parsing-configs/:file_type",
            get(handlers::get_parsing_config),
        )
        // Imports
        .route(
            "/data-sources/:id/imports",
            post(handlers::import_transactions),
        )
        .route("/imports/suggest-mapping", post(handlers::suggest_mapping))
        .route("/imports/:id", get(handlers::get_import))
        .route(
            "/imports/:id/raw-transactions",
            get(handlers::list_raw_transactions),
        )
        .route("/transactions/:id", get(handlers::get_transaction))
        // Matching
        .route("/match-sets/:id/runs", post(handlers::run_match_set))
        .route("/match-sets/:id/status", get(handlers::get_match_set_status))
        .route("/match-sets/:id/unmatched", get(handlers::list_unmatched))
        .route(
            "/match-sets/:id/manual-matches",
            post(handlers::create_manual_match),
        )
        // Approval
        .route("/matches", get(handlers::search_matches))
        .route("/matches/:id", get(handlers::get_match))
        .route("/matches/:id/approve", post(handlers::approve_match))
        .route("/matches/:id/reject", post(handlers::reject_match));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}
