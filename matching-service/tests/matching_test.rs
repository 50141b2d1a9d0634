mod common;

use chrono::{Duration, Utc};
use common::{id_of, json_body, spawn_app, spawn_app_with, APPROVER, PREPARER};
use matching_service::config::RunMode;
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

fn member_ids(m: &Value) -> Vec<Uuid> {
    m["transaction_ids"]
        .as_array()
        .expect("transaction_ids")
        .iter()
        .filter_map(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))
        .collect()
}

#[tokio::test]
async fn test_run_matches_offsetting_pair_and_reject_unwinds_it() {
    let app = spawn_app().await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-01-05,Vendor payment,-100.00,INV-1",
            "2024-01-06,Vendor invoice,100.00,XYZ",
            2,
        )
        .await;

    let response = app.run(match_set_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["summary"]["groups_created"], 1);
    assert_eq!(body["summary"]["transactions_matched"], 2);

    let status = app.status(match_set_id).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["total_transactions"], 2);
    assert_eq!(status["matched_count"], 2);
    assert_eq!(status["unmatched_count"], 0);

    let pending = app.pending_matches(match_set_id).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["match_type"], "automatic");
    assert_eq!(pending[0]["match_status"], "pending");
    assert_eq!(member_ids(&pending[0]).len(), 2);

    let match_id = id_of(&pending[0], "match_id");
    let response = app
        .post(&format!("/matches/{}/reject", match_id), APPROVER)
        .json(&json!({ "reason": "different vendors" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::OK);
    let rejected = json_body(response).await;
    assert_eq!(rejected["match_status"], "rejected");
    assert_eq!(rejected["approved_by"], APPROVER);

    let status = app.status(match_set_id).await;
    assert_eq!(status["matched_count"], 0);
    assert_eq!(status["unmatched_count"], 2);

    let response = app
        .get(&format!("/match-sets/{}/unmatched", match_set_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    let unmatched = json_body(response).await;
    let unmatched = unmatched.as_array().expect("array");
    assert_eq!(unmatched.len(), 2);
    assert!(unmatched.iter().all(|u| u["reason"]
        .as_str()
        .unwrap_or_default()
        .starts_with("match rejected")));

    for id in member_ids(&rejected) {
        let response = app
            .get(&format!("/transactions/{}", id), PREPARER)
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(json_body(response).await["status"], "unmatched");
    }
}

#[tokio::test]
async fn test_date_tolerance_is_inclusive() {
    let app = spawn_app().await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-01-05,Wire,-250.00,A",
            "2024-01-07,Wire,250.00,B",
            2,
        )
        .await;

    let body = json_body(app.run(match_set_id).await).await;
    assert_eq!(body["summary"]["groups_created"], 1);
}

#[tokio::test]
async fn test_one_day_past_tolerance_stays_unmatched() {
    let app = spawn_app().await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-01-05,Wire,-250.00,A",
            "2024-01-08,Wire,250.00,B",
            2,
        )
        .await;

    let body = json_body(app.run(match_set_id).await).await;
    assert_eq!(body["summary"]["groups_created"], 0);
    assert_eq!(body["summary"]["transactions_unmatched"], 2);

    let response = app
        .get(&format!("/match-sets/{}/unmatched", match_set_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    let unmatched = json_body(response).await;
    assert!(unmatched
        .as_array()
        .expect("array")
        .iter()
        .any(|u| u["reason"] == "no candidate within date tolerance"));
}

#[tokio::test]
async fn test_rerun_without_new_data_adds_no_matches() {
    let app = spawn_app().await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-02-01,Card,-42.10,R1",
            "2024-02-01,Card,42.10,R1",
            0,
        )
        .await;

    let first = json_body(app.run(match_set_id).await).await;
    assert_eq!(first["summary"]["groups_created"], 1);

    let second = json_body(app.run(match_set_id).await).await;
    assert_eq!(second["status"], "completed");
    assert_eq!(second["summary"]["groups_created"], 0);

    let status = app.status(match_set_id).await;
    assert_eq!(status["matched_count"], 2);
    assert_eq!(app.pending_matches(match_set_id).await.len(), 1);
}

#[tokio::test]
async fn test_matched_transactions_cannot_be_matched_again() {
    let app = spawn_app().await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-03-10,Refund,-9.99,X",
            "2024-03-10,Refund,9.99,X",
            0,
        )
        .await;
    app.run(match_set_id).await;

    let pending = app.pending_matches(match_set_id).await;
    let ids = member_ids(&pending[0]);

    let response = app
        .post(&format!("/match-sets/{}/manual-matches", match_set_id), PREPARER)
        .json(&json!({ "transaction_ids": ids }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_manual_match_groups_unmatched_transactions() {
    let app = spawn_app().await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-04-01,Fee,-10.00,F1",
            "2024-04-01,Fee,12.00,F1",
            0,
        )
        .await;
    let body = json_body(app.run(match_set_id).await).await;
    assert_eq!(body["summary"]["groups_created"], 0);

    let response = app
        .get(&format!("/match-sets/{}/unmatched", match_set_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    let ids: Vec<String> = json_body(response)
        .await
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|u| u["transaction_id"].as_str().map(str::to_string))
        .collect();
    assert_eq!(ids.len(), 2);

    let response = app
        .post(&format!("/match-sets/{}/manual-matches", match_set_id), PREPARER)
        .json(&json!({ "transaction_ids": ids }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::CREATED);
    let detail = json_body(response).await;
    assert_eq!(detail["match_type"], "manual");
    assert_eq!(detail["match_status"], "pending");
    assert_eq!(detail["matched_by"], PREPARER);
    assert_eq!(detail["transactions"].as_array().map(Vec::len), Some(2));

    let status = app.status(match_set_id).await;
    assert_eq!(status["matched_count"], 2);
    assert_eq!(status["unmatched_count"], 0);
}

#[tokio::test]
async fn test_manual_match_needs_two_sources() {
    let app = spawn_app().await;
    let source = app.create_data_source("bank").await;
    let other = app.create_data_source("ledger").await;
    let import = app
        .import_rows(
            source,
            &["2024-04-01,Fee,-10.00,F1", "2024-04-02,Fee,10.00,F2"],
        )
        .await;
    let rule = app
        .create_rule(json!({ "name": "amount", "match_by_amount": true }))
        .await;
    let match_set_id = app.create_match_set(rule, &[source, other]).await;

    let import_id = id_of(&import["import"], "import_id");
    let response = app
        .get(&format!("/imports/{}/raw-transactions", import_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    let ids: Vec<Value> = json_body(response)
        .await
        .as_array()
        .expect("array")
        .iter()
        .map(|r| r["transaction_id"].clone())
        .collect();

    let response = app
        .post(&format!("/match-sets/{}/manual-matches", match_set_id), PREPARER)
        .json(&json!({ "transaction_ids": ids }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_second_start_while_running_conflicts() {
    let app = spawn_app().await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-05-01,Rent,-900.00,R",
            "2024-05-01,Rent,900.00,R",
            0,
        )
        .await;

    // Another worker holds the match set.
    let held = app
        .repo
        .try_start_run(
            app.tenant_id,
            match_set_id,
            Uuid::new_v4(),
            Utc::now() - Duration::hours(1),
        )
        .await
        .expect("claim");
    assert!(held.is_some());

    let response = app.run(match_set_id).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let status = app.status(match_set_id).await;
    assert_eq!(status["status"], "running");
    assert_eq!(status["matched_count"], 0);
}

#[tokio::test]
async fn test_stale_run_is_taken_over() {
    let app = spawn_app_with(|config| config.runs.stale_after_secs = 0).await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-05-01,Rent,-900.00,R",
            "2024-05-01,Rent,900.00,R",
            0,
        )
        .await;

    app.repo
        .try_start_run(
            app.tenant_id,
            match_set_id,
            Uuid::new_v4(),
            Utc::now() - Duration::hours(1),
        )
        .await
        .expect("claim")
        .expect("claimed");
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let response = app.run(match_set_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["summary"]["groups_created"], 1);
}

#[tokio::test]
async fn test_queued_run_completes_in_background() {
    let app = spawn_app_with(|config| config.runs.mode = RunMode::Queued).await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-06-01,Payroll,-1500.00,P",
            "2024-06-02,Payroll,1500.00,P",
            1,
        )
        .await;

    let response = app.run(match_set_id).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "running");

    let mut status = Value::Null;
    for _ in 0..100 {
        status = app.status(match_set_id).await;
        if status["status"] != "running" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(status["status"], "completed");
    assert_eq!(status["matched_count"], 2);
    assert_eq!(status["last_run"]["matched_groups"], 1);
}

#[tokio::test]
async fn test_other_tenants_see_nothing() {
    let app = spawn_app().await;
    let (match_set_id, _) = app
        .seed_pair(
            "2024-07-01,Sub,-5.00,S",
            "2024-07-01,Sub,5.00,S",
            0,
        )
        .await;
    app.run(match_set_id).await;
    let match_id = id_of(&app.pending_matches(match_set_id).await[0], "match_id");

    let intruder = Uuid::new_v4();
    app.grant_default_roles(intruder).await;

    let response = app
        .get_in(intruder, &format!("/match-sets/{}/status", match_set_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_in(intruder, &format!("/match-sets/{}/runs", match_set_id), PREPARER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .get_in(intruder, &format!("/matches/{}", match_id), APPROVER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_in(intruder, &format!("/matches/{}/approve", match_id), APPROVER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .get_in(intruder, "/matches", APPROVER)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(json_body(response).await.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_rule_without_criteria_cannot_run() {
    let app = spawn_app().await;
    let bank = app.create_data_source("bank").await;
    let ledger = app.create_data_source("ledger").await;
    let rule = app.create_rule(json!({ "name": "nothing" })).await;
    let match_set_id = app.create_match_set(rule, &[bank, ledger]).await;

    let response = app.run(match_set_id).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let status = app.status(match_set_id).await;
    assert_eq!(status["status"], "idle");
}
