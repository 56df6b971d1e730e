//! Routing of object-created notifications.

mod common;

use std::sync::Arc;

use common::{BUCKET, Harness, jsonl};
use serde_json::json;
use yorutsuke_core::ExtractionBackend;
use yorutsuke_core::types::BackendKind;
use yorutsuke_test::{MockBackend, fixtures};
use yorutsuke_worker::event::{DispatchOutcome, dispatch, parse_notification};

fn notification(records: &[(&str, &str)]) -> String {
    let records: Vec<_> = records
        .iter()
        .map(|(bucket, key)| {
            json!({
                "eventName": "ObjectCreated:Put",
                "s3": { "bucket": { "name": bucket }, "object": { "key": key } },
            })
        })
        .collect();
    json!({ "Records": records }).to_string()
}

fn harness() -> Harness {
    let backend: Arc<dyn ExtractionBackend> = Arc::new(MockBackend::succeeding(
        fixtures::extraction(BackendKind::Gemini, 1280.0),
    ));
    Harness::new(vec![backend])
}

#[tokio::test]
async fn routes_each_record_to_its_pipeline() {
    let harness = harness();
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));
    harness.put("uploads/owner-1/img-1.jpg", &b"jpeg"[..]).await;
    harness
        .put(
            "batch-output/job-1/records.jsonl.out",
            jsonl(&[fixtures::batch_line(
                "img-2",
                "owner-1",
                &fixtures::receipt_json(),
            )]),
        )
        .await;

    let body = notification(&[
        (BUCKET, "uploads/owner-1/img-1.jpg"),
        (BUCKET, "batch-output/job-1/records.jsonl.out"),
        (BUCKET, "batch-output/job-1/manifest.json.out"),
        (BUCKET, "receipts/owner-1/img-1.jpg"),
        ("someone-else", "uploads/owner-1/img-3.jpg"),
    ]);
    let events = parse_notification(&body).unwrap();
    let outcomes = dispatch(&harness.state, &events).await;

    assert_eq!(outcomes.len(), 5);
    assert!(matches!(&outcomes[0], DispatchOutcome::Image(report) if report.is_done()));
    assert!(matches!(
        &outcomes[1],
        DispatchOutcome::Batch(report) if report.inserted == 1 && report.job_completed
    ));
    assert!(matches!(
        &outcomes[2],
        DispatchOutcome::Ignored { reason: "not a result file", .. }
    ));
    assert!(matches!(
        &outcomes[3],
        DispatchOutcome::Ignored { reason: "unrouted prefix", .. }
    ));
    assert!(matches!(
        &outcomes[4],
        DispatchOutcome::Ignored { reason: "foreign bucket", .. }
    ));

    assert_eq!(harness.store.len(), 2);
    assert!(harness.exists("receipts/owner-1/img-1.jpg").await);
}

#[tokio::test]
async fn encoded_keys_are_decoded_before_routing() {
    let harness = harness();
    harness
        .put("uploads/owner-1/lunch receipt.jpg", &b"jpeg"[..])
        .await;

    let body = notification(&[(BUCKET, "uploads/owner-1/lunch+receipt.jpg")]);
    let events = parse_notification(&body).unwrap();
    let outcomes = dispatch(&harness.state, &events).await;

    let DispatchOutcome::Image(report) = &outcomes[0] else {
        panic!("expected the image pipeline, got {:?}", outcomes[0]);
    };
    assert!(report.is_done());
    assert_eq!(report.image_id.as_deref(), Some("lunch receipt"));
    assert!(harness.store.transaction_for_image("lunch receipt").is_some());
}

#[tokio::test]
async fn redelivered_notification_is_idempotent() {
    let harness = harness();
    harness.put("uploads/owner-1/img-1.jpg", &b"jpeg"[..]).await;
    let events = parse_notification(&notification(&[(BUCKET, "uploads/owner-1/img-1.jpg")])).unwrap();

    dispatch(&harness.state, &events).await;
    let outcomes = dispatch(&harness.state, &events).await;

    assert!(matches!(&outcomes[0], DispatchOutcome::Image(report) if report.is_done() && report.resumed));
    assert_eq!(harness.store.len(), 1);
}
