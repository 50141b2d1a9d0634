pub mod configuration;
pub mod health;
pub mod imports;
pub mod matches;
pub mod matching;
pub mod schemas;

pub use configuration::{
    create_data_source, create_match_rule, create_match_set, get_data_source, get_match_rule,
    get_match_set,
};
pub use health::{health_check, metrics_endpoint, readiness_check};
pub use imports::{
    get_import, get_transaction, import_transactions, list_raw_transactions, suggest_mapping,
};
pub use matches::{approve_match, get_match, reject_match, search_matches};
pub use matching::{create_manual_match, get_match_set_status, list_unmatched, run_match_set};
pub use schemas::{
    add_schema_field, create_parsing_config, create_schema, create_schema_mapping,
    get_parsing_config, get_schema, list_schema_mappings,
};
