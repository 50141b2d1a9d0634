mod common;

use common::{id_of, json_body, spawn_app, spawn_app_with, ADMIN, PREPARER};
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_bad_row_is_reported_and_the_rest_imported() {
    let app = spawn_app().await;
    let source = app.create_data_source("bank").await;

    let body = app
        .import_rows(
            source,
            &[
                "2024-01-01,Coffee,-3.50,C1",
                "2024-01-02,Lunch,-12.00,L1",
                "not-a-date,Broken,-1.00,B1",
                "2024-01-04,Salary,2500.00,S1",
                "2024-01-05,Rent,-900.00,R1",
            ],
        )
        .await;

    assert_eq!(body["import"]["row_count"], 5);
    assert_eq!(body["import"]["error_count"], 1);
    assert_eq!(body["import"]["success_count"], 4);
    assert_eq!(body["import"]["status"], "completed");

    let row_errors = body["row_errors"].as_array().expect("row_errors");
    assert_eq!(row_errors.len(), 1);
    assert_eq!(row_errors[0]["row_number"], 3);
    assert!(row_errors[0]["error"]
        .as_str()
        .unwrap_or_default()
        .contains("invalid date"));

    let import_id = id_of(&body["import"], "import_id");
    let response = app
        .get(&format!("/imports/{}/raw-transactions", import_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::OK);
    let raw = json_body(response).await;
    let raw = raw.as_array().expect("raw rows");
    assert_eq!(raw.len(), 5);
    assert_eq!(raw[2]["row_number"], 3);
    assert!(raw[2]["error_message"].is_string());
    assert!(raw[2]["transaction_id"].is_null());
    assert_eq!(raw[2]["raw_data"]["Description"], "Broken");
    assert!(raw[0]["transaction_id"].is_string());
}

#[tokio::test]
async fn test_transaction_carries_canonical_fields() {
    let app = spawn_app().await;
    let response = app
        .post("/data-sources", ADMIN)
        .json(&json!({ "name": "eu bank", "default_currency": "eur" }))
        .send()
        .await
        .expect("Failed to execute request.");
    let source = id_of(&json_body(response).await, "data_source_id");

    let body = app
        .import_rows(source, &["2024-02-29,Card payment,\"(1,234.50)\",REF-9"])
        .await;
    assert_eq!(body["import"]["success_count"], 1);

    let import_id = id_of(&body["import"], "import_id");
    let response = app
        .get(&format!("/imports/{}/raw-transactions", import_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    let raw = json_body(response).await;
    let transaction_id = id_of(&raw[0], "transaction_id");

    let response = app
        .get(&format!("/transactions/{}", transaction_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    let transaction = json_body(response).await;
    assert_eq!(transaction["transaction_date"], "2024-02-29");
    assert_eq!(transaction["post_date"], "2024-02-29");
    assert_eq!(transaction["amount"], "-1234.50");
    assert_eq!(transaction["currency"], "EUR");
    assert_eq!(transaction["reference"], "REF-9");
    assert_eq!(transaction["status"], "unmatched");
    assert_eq!(transaction["created_by"], PREPARER);
}

#[tokio::test]
async fn test_file_without_data_rows_fails_the_import() {
    let app = spawn_app().await;
    let source = app.create_data_source("bank").await;

    let body = app.import_rows(source, &[]).await;
    assert_eq!(body["import"]["row_count"], 0);
    assert_eq!(body["import"]["status"], "failed");
    assert!(body["import"]["error_message"].is_string());
}

#[tokio::test]
async fn test_missing_mapping_is_rejected_before_any_row() {
    let app = spawn_app().await;
    let source = app.create_data_source("bank").await;

    let response = app
        .post(&format!("/data-sources/{}/imports", source), PREPARER)
        .json(&json!({
            "file_name": "statement.csv",
            "content": "Date,Amount\n2024-01-01,5.00",
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_data_source_is_not_found() {
    let app = spawn_app().await;

    let response = app
        .post(
            &format!("/data-sources/{}/imports", uuid::Uuid::new_v4()),
            PREPARER,
        )
        .json(&json!({ "file_name": "x.csv", "content": "a,b\n1,2" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_file_is_rejected() {
    let app = spawn_app_with(|config| config.imports.max_bytes = 64).await;
    let source = app.create_data_source("bank").await;

    let response = app
        .post(&format!("/data-sources/{}/imports", source), PREPARER)
        .json(&json!({
            "file_name": "big.csv",
            "content": "Date,Description,Amount,Reference\n".repeat(3),
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_suggest_mapping_buckets_headers() {
    let app = spawn_app().await;

    let response = app
        .post("/imports/suggest-mapping", PREPARER)
        .json(&json!({
            "headers": ["Transaction Date", "Post Date", "Description", "Amount", "Ref No", "Currency"]
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let mappings = &body["column_mappings"];
    assert_eq!(mappings["date"], 0);
    assert_eq!(mappings["postDate"], 1);
    assert_eq!(mappings["description"], 2);
    assert_eq!(mappings["amount"], 3);
    assert_eq!(mappings["reference"], 4);
    assert_eq!(mappings["currency"], 5);

    let response = app
        .post("/imports/suggest-mapping", PREPARER)
        .json(&json!({ "content": "date,desc,value,id\n2024-01-01,x,1,2" }))
        .send()
        .await
        .expect("Failed to execute request.");
    let body = json_body(response).await;
    assert_eq!(body["column_mappings"]["amount"], 2);
    assert_eq!(body["column_mappings"]["reference"], 3);
    assert_eq!(body["headers"][2], "value");
    assert_eq!(body["preview"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["preview"][0][1], "x");
}

#[tokio::test]
async fn test_suggest_mapping_previews_first_rows_only() {
    let app = spawn_app().await;
    let rows: Vec<String> = (1..=8)
        .map(|day| format!("2024-01-0{},Row {},1.00,R{}", day, day, day))
        .collect();

    let response = app
        .post("/imports/suggest-mapping", PREPARER)
        .json(&json!({ "content": format!("{}\n{}", common::BANK_CSV_HEADER, rows.join("\n")) }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let preview = body["preview"].as_array().expect("preview");
    assert_eq!(preview.len(), 5);
    assert_eq!(preview[0][1], "Row 1");
    assert_eq!(preview[4][3], "R5");
}
