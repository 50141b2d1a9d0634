mod common;

use common::{id_of, json_body, spawn_app, ADMIN, PREPARER};
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_schema_with_fields_round_trips() {
    let app = spawn_app().await;

    let response = app
        .post("/schemas", ADMIN)
        .json(&json!({
            "name": "EU bank export",
            "fields": [
                { "name": "Buchungstag", "field_type": "date", "required": true },
                { "name": "Betrag", "field_type": "number", "required": true },
                { "name": "Verwendungszweck", "field_type": "string" }
            ]
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    let schema_id = id_of(&created, "schema_id");
    assert_eq!(created["created_by"], ADMIN);

    let response = app
        .get(&format!("/schemas/{}", schema_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::OK);
    let schema = json_body(response).await;
    assert_eq!(schema["name"], "EU bank export");
    let fields = schema["fields"].as_array().expect("fields");
    assert_eq!(fields.len(), 3);
    assert_eq!(fields[0]["name"], "Buchungstag");
    assert_eq!(fields[1]["field_type"], "number");
    assert_eq!(fields[2]["display_name"], "Verwendungszweck");
}

#[tokio::test]
async fn test_unknown_field_type_is_rejected() {
    let app = spawn_app().await;
    let response = app
        .post("/schemas", ADMIN)
        .json(&json!({ "name": "s" }))
        .send()
        .await
        .expect("Failed to execute request.");
    let schema_id = id_of(&json_body(response).await, "schema_id");

    let response = app
        .post(&format!("/schemas/{}/fields", schema_id), ADMIN)
        .json(&json!({ "name": "when", "field_type": "datetime" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_import_uses_schema_mappings_and_parsing_config() {
    let app = spawn_app().await;

    let response = app
        .post("/schemas", ADMIN)
        .json(&json!({ "name": "EU bank export" }))
        .send()
        .await
        .expect("Failed to execute request.");
    let schema_id = id_of(&json_body(response).await, "schema_id");

    for (source, target, transformation) in [
        ("Buchungstag", "date", None),
        ("Verwendungszweck", "description", Some("trim")),
        ("Betrag", "amount", Some("negate")),
        ("Referenz", "reference", Some("trim|upper")),
    ] {
        let response = app
            .post(&format!("/schemas/{}/mappings", schema_id), ADMIN)
            .json(&json!({
                "source_field_name": source,
                "target_field_name": target,
                "transformation": transformation,
            }))
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .get(&format!("/schemas/{}/mappings", schema_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(json_body(response).await.as_array().map(Vec::len), Some(4));

    let response = app
        .post(&format!("/schemas/{}/parsing-configs", schema_id), ADMIN)
        .json(&json!({
            "file_type": "CSV",
            "delimiter": ";",
            "date_format": "DD.MM.YYYY",
            "number_format": "1.234,56"
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await["file_type"], "csv");

    let response = app
        .get(&format!("/schemas/{}/parsing-configs/csv", schema_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["delimiter"], ";");

    let response = app
        .post("/data-sources", ADMIN)
        .json(&json!({ "name": "sparkasse", "schema_id": schema_id, "default_currency": "EUR" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::CREATED);
    let source = id_of(&json_body(response).await, "data_source_id");

    let response = app
        .post(&format!("/data-sources/{}/imports", source), PREPARER)
        .json(&json!({
            "file_name": "umsaetze.csv",
            "content": "Buchungstag;Verwendungszweck;Betrag;Referenz\n\
                        31.01.2024; Miete Januar ;1.250,00; rent-01\n\
                        2024-02-01;Kaputt;5,00;x",
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["import"]["row_count"], 2);
    assert_eq!(body["import"]["success_count"], 1);
    assert_eq!(body["row_errors"][0]["row_number"], 2);

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
    assert_eq!(transaction["transaction_date"], "2024-01-31");
    assert_eq!(transaction["description"], "Miete Januar");
    assert_eq!(transaction["amount"], "-1250.00");
    assert_eq!(transaction["reference"], "RENT-01");
    assert_eq!(transaction["currency"], "EUR");
}

#[tokio::test]
async fn test_duplicate_parsing_config_conflicts() {
    let app = spawn_app().await;
    let response = app
        .post("/schemas", ADMIN)
        .json(&json!({ "name": "s" }))
        .send()
        .await
        .expect("Failed to execute request.");
    let schema_id = id_of(&json_body(response).await, "schema_id");

    let path = format!("/schemas/{}/parsing-configs", schema_id);
    let first = app
        .post(&path, ADMIN)
        .json(&json!({}))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .post(&path, ADMIN)
        .json(&json!({ "file_type": "csv" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let response = app
        .get(&format!("/schemas/{}/parsing-configs/xlsx", schema_id), ADMIN)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_data_source_with_unknown_schema_is_rejected() {
    let app = spawn_app().await;
    let response = app
        .post("/data-sources", ADMIN)
        .json(&json!({ "name": "bank", "schema_id": uuid::Uuid::new_v4() }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
