use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use changefeed_cell::{ChangeHub, ChangeOp, QueueTable};
use queue_sync_cell::*;
use shared_database::SupabaseClient;
use shared_utils::test_utils::TestConfig;

fn chamber_row(chamber_id: Uuid, doctor_id: Uuid, current_serial: u32) -> serde_json::Value {
    json!({
        "chamber_id": chamber_id,
        "doctor_id": doctor_id,
        "current_serial": current_serial,
        "total_in_queue": 3,
        "estimated_wait_minutes": 20,
        "delay_minutes": 0,
        "doctor_message": null,
        "average_consult_minutes": 10,
        "last_updated": "2025-06-01T09:00:00Z"
    })
}

fn entry_row(appointment_id: Uuid, chamber_id: Uuid, serial: u32, status: &str) -> serde_json::Value {
    json!({
        "appointment_id": appointment_id,
        "patient_id": Uuid::new_v4(),
        "doctor_id": Uuid::new_v4(),
        "chamber_id": chamber_id,
        "serial_number": serial,
        "status": status,
        "delay_minutes": 0,
        "last_updated": "2025-06-01T09:00:00Z"
    })
}

async fn store_against(server: &MockServer) -> (SupabaseQueueStore, Arc<ChangeHub>) {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = server.uri();

    let hub = Arc::new(ChangeHub::default());
    let client = Arc::new(SupabaseClient::new(&config));
    (SupabaseQueueStore::new(client, Arc::clone(&hub)), hub)
}

#[tokio::test]
async fn test_snapshot_reads_both_tables() {
    let server = MockServer::start().await;
    let chamber_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/chamber_state"))
        .and(query_param("chamber_id", format!("eq.{}", chamber_id)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([chamber_row(chamber_id, doctor_id, 2)])),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/queue_entries"))
        .and(query_param("chamber_id", format!("eq.{}", chamber_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            entry_row(Uuid::new_v4(), chamber_id, 3, "waiting"),
            entry_row(appointment_id, chamber_id, 2, "current"),
        ])))
        .mount(&server)
        .await;

    let (store, _hub) = store_against(&server).await;
    let snapshot = store.snapshot(chamber_id).await.expect("snapshot should load");

    assert_eq!(snapshot.chamber.chamber_id, chamber_id);
    assert_eq!(snapshot.chamber.current_serial, 2);
    // Entries come back sorted by serial regardless of store order.
    assert_eq!(snapshot.entries[0].serial_number, 2);
    assert_eq!(snapshot.entries[0].status, QueueEntryStatus::Current);
    assert_eq!(snapshot.entries[1].serial_number, 3);
}

#[tokio::test]
async fn test_unknown_chamber_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/chamber_state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (store, _hub) = store_against(&server).await;
    let result = store.chamber_state(Uuid::new_v4()).await;

    assert_matches!(result.unwrap_err(), QueueSyncError::NotFound(_));
}

#[tokio::test]
async fn test_mark_completed_persists_and_feeds_the_hub() {
    let server = MockServer::start().await;
    let chamber_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/queue_entries"))
        .and(query_param("appointment_id", format!("eq.{}", appointment_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([entry_row(appointment_id, chamber_id, 4, "current")])),
        )
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/queue_entries"))
        .and(query_param("appointment_id", format!("eq.{}", appointment_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([entry_row(appointment_id, chamber_id, 4, "completed")])),
        )
        .mount(&server)
        .await;

    let (store, hub) = store_against(&server).await;
    let mut raw = hub.subscribe_raw();

    let entry = store
        .mark_completed(appointment_id)
        .await
        .expect("mark_completed should succeed");
    assert_eq!(entry.status, QueueEntryStatus::Completed);

    // The persisted mutation is what the changefeed observes.
    let change = raw.try_recv().expect("mutation should reach the hub");
    assert_eq!(change.table, QueueTable::QueueEntries);
    assert_eq!(change.op, ChangeOp::Update);
    assert_eq!(change.new_row["status"], "completed");
    assert_eq!(change.old_row.unwrap()["status"], "current");
}

#[tokio::test]
async fn test_store_error_surfaces_as_store_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/chamber_state"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let (store, _hub) = store_against(&server).await;
    let result = store.chamber_state(Uuid::new_v4()).await;

    assert_matches!(result.unwrap_err(), QueueSyncError::StoreError(_));
}
