//! Configuration module for matching-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: Option<DatabaseConfig>,
    pub auth: AuthConfig,
    pub runs: RunConfig,
    pub imports: ImportConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Self::Memory,
            _ => Self::Postgres,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// When false every identified caller holds every capability.
    pub enforce: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Inline,
    Queued,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Queued => "queued",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            _ => Self::Inline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: RunMode,
    pub worker_count: usize,
    pub queue_size: usize,
    pub timeout_secs: u64,
    pub stale_after_secs: u64,
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Inline,
            worker_count: 4,
            queue_size: 100,
            timeout_secs: 300,
            stale_after_secs: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub default_currency: String,
    pub max_bytes: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl MatchingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let store = StoreBackend::from_str(
            &env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string()),
        );

        let database = match store {
            StoreBackend::Postgres => Some(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            }),
            StoreBackend::Memory => None,
        };

        let run_defaults = RunConfig::default();
        let import_defaults = ImportConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "matching-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            database,
            auth: AuthConfig {
                enforce: env::var("AUTH_ENFORCE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(true),
            },
            runs: RunConfig {
                mode: env::var("RUN_MODE")
                    .map(|s| RunMode::from_str(&s))
                    .unwrap_or(run_defaults.mode),
                worker_count: env::var("RUN_WORKERS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &usize| *n > 0)
                    .unwrap_or(run_defaults.worker_count),
                queue_size: env::var("RUN_QUEUE_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &usize| *n > 0)
                    .unwrap_or(run_defaults.queue_size),
                timeout_secs: env::var("RUN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(run_defaults.timeout_secs),
                stale_after_secs: env::var("RUN_STALE_AFTER_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(run_defaults.stale_after_secs),
            },
            imports: ImportConfig {
                default_currency: env::var("DEFAULT_CURRENCY")
                    .map(|s| s.trim().to_ascii_uppercase())
                    .unwrap_or(import_defaults.default_currency),
                max_bytes: env::var("IMPORT_MAX_BYTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(import_defaults.max_bytes),
            },
        })
    }

    /// In-memory configuration with enforcement on, used by tests and local runs.
    pub fn for_memory_store() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "matching-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            store: StoreBackend::Memory,
            database: None,
            auth: AuthConfig { enforce: true },
            runs: RunConfig::default(),
            imports: ImportConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_parsing_is_lenient() {
        assert_eq!(RunMode::from_str("queued"), RunMode::Queued);
        assert_eq!(RunMode::from_str(" QUEUED "), RunMode::Queued);
        assert_eq!(RunMode::from_str("anything"), RunMode::Inline);
    }

    #[test]
    fn test_store_backend_defaults_to_postgres() {
        assert_eq!(StoreBackend::from_str("memory"), StoreBackend::Memory);
        assert_eq!(StoreBackend::from_str(""), StoreBackend::Postgres);
    }

    #[test]
    fn test_memory_config_has_no_database() {
        let config = MatchingConfig::for_memory_store();
        assert!(config.database.is_none());
        assert!(config.auth.enforce);
        assert_eq!(config.runs.mode, RunMode::Inline);
        assert_eq!(config.imports.default_currency, "USD");
    }
}
