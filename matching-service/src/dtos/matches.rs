use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ManualMatchRequest {
    #[validate(length(min = 2, message = "At least two transactions are required"))]
    pub transaction_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectMatchRequest {
    #[validate(length(min = 1, max = 1000, message = "Reason must be 1-1000 characters"))]
    pub reason: String,
}
