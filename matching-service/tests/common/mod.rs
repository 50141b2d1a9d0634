#![allow(dead_code)]

use matching_service::config::MatchingConfig;
use matching_service::models::Role;
use matching_service::services::Repository;
use matching_service::startup::Application;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const PREPARER: &str = "preparer-1";
pub const APPROVER: &str = "approver-1";
pub const ADMIN: &str = "admin-1";

pub const BANK_CSV_HEADER: &str = "Date,Description,Amount,Reference";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: Client,
    pub repo: Arc<dyn Repository>,
    pub tenant_id: Uuid,
}

/// Spawns the service on a random port against the in-memory store, with
/// one preparer, one approver and one admin in a fresh tenant.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut MatchingConfig)) -> TestApp {
    let mut config = MatchingConfig::for_memory_store();
    config.common.host = "127.0.0.1".to_string();
    config.common.port = 0; // Random port for testing
    configure(&mut config);

    let app = Application::build(config)
        .await
        .expect("Failed to build test application");

    let port = app.http_port();
    let repo = app.repository();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    // Wait for HTTP server to be ready by polling health endpoint
    let client = Client::new();
    for _ in 0..50 {
        if client
            .get(format!("{}/health", address))
            .send()
            .await
            .is_ok()
        {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    }

    let test_app = TestApp {
        address,
        port,
        client,
        repo,
        tenant_id: Uuid::new_v4(),
    };
    test_app.grant_default_roles(test_app.tenant_id).await;
    test_app
}

/// Adds the gateway identity headers.
pub fn with_tenant(builder: RequestBuilder, tenant_id: Uuid, user_id: &str) -> RequestBuilder {
    builder
        .header("X-Tenant-ID", tenant_id.to_string())
        .header("X-User-ID", user_id)
}

pub async fn json_body(response: Response) -> Value {
    response.json().await.expect("Failed to parse JSON")
}

pub fn id_of(body: &Value, field: &str) -> Uuid {
    body[field]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| panic!("missing {} in {}", field, body))
}

impl TestApp {
    pub fn api(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.address, path)
    }

    pub async fn grant_default_roles(&self, tenant_id: Uuid) {
        for (user, role) in [
            (PREPARER, Role::Preparer),
            (APPROVER, Role::Approver),
            (ADMIN, Role::Admin),
        ] {
            self.repo
                .assign_role(tenant_id, user, role)
                .await
                .expect("Failed to assign role");
        }
    }

    pub fn get(&self, path: &str, user: &str) -> RequestBuilder {
        self.get_in(self.tenant_id, path, user)
    }

    pub fn post(&self, path: &str, user: &str) -> RequestBuilder {
        self.post_in(self.tenant_id, path, user)
    }

    pub fn get_in(&self, tenant_id: Uuid, path: &str, user: &str) -> RequestBuilder {
        with_tenant(self.client.get(self.api(path)), tenant_id, user)
    }

    pub fn post_in(&self, tenant_id: Uuid, path: &str, user: &str) -> RequestBuilder {
        with_tenant(self.client.post(self.api(path)), tenant_id, user)
    }

    // ========================================================================
    // Seeding helpers
    // ========================================================================

    pub async fn create_data_source(&self, name: &str) -> Uuid {
        let response = self
            .post("/data-sources", ADMIN)
            .json(&json!({ "name": name }))
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(response.status(), StatusCode::CREATED);
        id_of(&json_body(response).await, "data_source_id")
    }

    /// Imports rows in `Date,Description,Amount,Reference` order.
    pub async fn import_rows(&self, data_source_id: Uuid, rows: &[&str]) -> Value {
        let mut content = String::from(BANK_CSV_HEADER);
        for row in rows {
            content.push('\n');
            content.push_str(row);
        }

        let response = self
            .post(&format!("/data-sources/{}/imports", data_source_id), PREPARER)
            .json(&json!({
                "file_name": "statement.csv",
                "content": content,
                "column_mappings": {
                    "date": 0,
                    "description": 1,
                    "amount": 2,
                    "reference": 3
                }
            }))
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    pub async fn create_rule(&self, rule: Value) -> Uuid {
        let response = self
            .post("/match-rules", ADMIN)
            .json(&rule)
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(response.status(), StatusCode::CREATED);
        id_of(&json_body(response).await, "match_rule_id")
    }

    pub async fn create_match_set(&self, match_rule_id: Uuid, data_source_ids: &[Uuid]) -> Uuid {
        let response = self
            .post("/match-sets", ADMIN)
            .json(&json!({
                "name": "bank vs ledger",
                "match_rule_id": match_rule_id,
                "data_source_ids": data_source_ids,
            }))
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(response.status(), StatusCode::CREATED);
        id_of(&json_body(response).await, "match_set_id")
    }

    /// Two sources, one row each, and an amount+date rule with the given
    /// tolerance. Returns (match_set_id, [bank, ledger]).
    pub async fn seed_pair(&self, bank_row: &str, ledger_row: &str, tolerance: i32) -> (Uuid, [Uuid; 2]) {
        let bank = self.create_data_source("bank").await;
        let ledger = self.create_data_source("ledger").await;
        self.import_rows(bank, &[bank_row]).await;
        self.import_rows(ledger, &[ledger_row]).await;

        let rule = self
            .create_rule(json!({
                "name": "amount and date",
                "match_by_amount": true,
                "match_by_date": true,
                "date_tolerance_days": tolerance,
                "match_by_reference": false
            }))
            .await;
        let match_set_id = self.create_match_set(rule, &[bank, ledger]).await;
        (match_set_id, [bank, ledger])
    }

    pub async fn run(&self, match_set_id: Uuid) -> Response {
        self.post(&format!("/match-sets/{}/runs", match_set_id), PREPARER)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn status(&self, match_set_id: Uuid) -> Value {
        let response = self
            .get(&format!("/match-sets/{}/status", match_set_id), PREPARER)
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    pub async fn pending_matches(&self, match_set_id: Uuid) -> Vec<Value> {
        let response = self
            .get(
                &format!("/matches?match_set_id={}&status=pending", match_set_id),
                APPROVER,
            )
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response)
            .await
            .as_array()
            .cloned()
            .unwrap_or_default()
    }
}
