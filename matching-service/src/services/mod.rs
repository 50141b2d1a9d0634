//! Services module for matching-service.

pub mod amount;
pub mod approval;
pub mod capability;
pub mod configuration;
pub mod database;
pub mod evaluator;
pub mod executor;
pub mod grouping;
pub mod imports;
pub mod ingestion;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod repository;
pub mod run_queue;
pub mod schema_registry;

pub use approval::ApprovalService;
pub use capability::{Capability, CapabilityChecker};
pub use configuration::ConfigurationService;
pub use database::Database;
pub use imports::{ImportRequest, ImportResult, ImportService};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{MatchSetStatus, MatchingOrchestrator, RunMatchSetResponse};
pub use repository::Repository;
pub use run_queue::RunQueue;
pub use schema_registry::{SchemaRegistry, SchemaWithFields};
