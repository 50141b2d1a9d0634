pub mod configuration;
pub mod imports;
pub mod matches;

pub use configuration::{
    CreateDataSourceRequest, CreateMappingRequest, CreateMatchRuleRequest, CreateMatchSetRequest,
    CreateParsingConfigRequest, CreateSchemaRequest, SchemaFieldRequest,
};
pub use imports::{ImportTransactionsRequest, SuggestMappingRequest};
pub use matches::{ManualMatchRequest, RejectMatchRequest};
