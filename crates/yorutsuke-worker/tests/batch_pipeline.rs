//! Batch pipeline behavior against in-memory collaborators.

mod common;

use std::time::Duration;

use common::{Harness, jsonl};
use serde_json::json;
use yorutsuke_core::identity::IdempotencyKey;
use yorutsuke_core::types::{BatchCounts, BatchJobStatus, TransactionStatus};
use yorutsuke_object::keys::BatchOutputKey;
use yorutsuke_test::{BatchWriteFault, MemoryStore, fixtures};
use yorutsuke_worker::PipelineConfig;
use yorutsuke_worker::pipeline::ingest_batch;

const RESULT_KEY: &str = "batch-output/job-1/records.jsonl.out";

fn output() -> BatchOutputKey {
    BatchOutputKey::parse(RESULT_KEY).unwrap()
}

fn valid_lines(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| fixtures::batch_line(&format!("img-{i}"), "owner-1", &fixtures::receipt_json()))
        .collect()
}

async fn with_uploads(harness: &Harness, n: usize) {
    for i in 0..n {
        harness
            .put(&format!("uploads/owner-1/img-{i}.jpg"), &b"jpeg"[..])
            .await;
    }
}

#[tokio::test]
async fn valid_file_is_persisted_migrated_and_completed() {
    let harness = Harness::new(Vec::new());
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));
    with_uploads(&harness, 3).await;
    harness.put(RESULT_KEY, jsonl(&valid_lines(3))).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.lines, 3);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.migrated, 3);
    assert!(report.job_completed);
    assert_eq!(harness.store.len(), 3);

    for i in 0..3 {
        assert!(!harness.exists(&format!("uploads/owner-1/img-{i}.jpg")).await);
        assert!(
            harness
                .exists(&format!("receipts/2025/01/15/owner-1/img-{i}.jpg"))
                .await
        );
    }

    let tx = harness.store.transaction_for_image("img-0").unwrap();
    assert_eq!(tx.id, IdempotencyKey::for_batch_record("job-1", "img-0").as_str());
    assert_eq!(tx.image.key, "receipts/2025/01/15/owner-1/img-0.jpg");

    let job = harness.store.job("batch-1").unwrap();
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(
        job.counts,
        BatchCounts {
            success: 3,
            failure: 0,
            total: 3
        }
    );
}

#[tokio::test]
async fn corrupt_lines_are_skipped_and_counted() {
    let harness = Harness::new(Vec::new());
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));

    let mut lines = valid_lines(100);
    for (at, corrupt) in [
        (0, "{".to_owned()),
        (20, "not json at all".to_owned()),
        (50, json!({ "recordId": "no-key" }).to_string()),
        (75, "[1, 2, 3]".to_owned()),
        (104, "\"just a string\"".to_owned()),
    ] {
        lines.insert(at, corrupt);
    }
    lines.insert(10, String::new());
    harness.put(RESULT_KEY, jsonl(&lines)).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.lines, 105);
    assert_eq!(report.parse_errors, 5);
    assert_eq!(report.inserted, 100);
    assert_eq!(harness.store.len(), 100);
    assert_eq!(
        harness.store.job("batch-1").unwrap().counts,
        BatchCounts {
            success: 100,
            failure: 5,
            total: 105
        }
    );
}

#[tokio::test]
async fn candidates_are_written_in_chunks_of_the_store_limit() {
    let harness =
        Harness::new(Vec::new()).with_pipeline(PipelineConfig::default().with_chunk_size(100));
    harness.put(RESULT_KEY, jsonl(&valid_lines(103))).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.inserted, 103);
    assert_eq!(harness.store.batch_sizes(), vec![25, 25, 25, 25, 3]);
}

#[tokio::test(start_paused = true)]
async fn partial_write_failure_retries_only_unprocessed_items() {
    let store = MemoryStore::new();
    store.inject_batch_fault(BatchWriteFault::Unprocessed(10));
    store.inject_batch_fault(BatchWriteFault::Unprocessed(4));
    let harness = Harness::with_store(store, Vec::new());
    let harness = harness.with_pipeline(PipelineConfig::default().with_retries(3, 100, 10_000));
    harness.put(RESULT_KEY, jsonl(&valid_lines(30))).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.inserted, 30);
    assert_eq!(report.write_failures, 0);
    assert_eq!(harness.store.batch_sizes(), vec![25, 10, 4, 5]);

    let times = harness.store.batch_call_times();
    let first = times[1] - times[0];
    let second = times[2] - times[1];
    assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(150));
    assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_count_as_failures_and_job_continues() {
    let store = MemoryStore::new();
    for _ in 0..3 {
        store.inject_batch_fault(BatchWriteFault::Unprocessed(2));
    }
    store.insert_job(fixtures::batch_job("batch-1", "job-1"));
    let harness = Harness::with_store(store, Vec::new());
    let harness = harness.with_pipeline(PipelineConfig::default().with_retries(2, 10, 100));
    with_uploads(&harness, 27).await;
    harness.put(RESULT_KEY, jsonl(&valid_lines(27))).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.write_failures, 2);
    assert_eq!(report.inserted, 25);
    assert_eq!(report.migrated, 25);
    assert!(report.job_completed);
    assert_eq!(harness.store.job("batch-1").unwrap().counts.failure, 2);
    assert!(harness.exists("uploads/owner-1/img-23.jpg").await);
    assert!(harness.exists("uploads/owner-1/img-24.jpg").await);
}

#[tokio::test]
async fn model_errors_are_persisted_as_degraded_records() {
    let harness = Harness::new(Vec::new());
    let lines = vec![
        fixtures::batch_line("img-0", "owner-1", &fixtures::receipt_json()),
        fixtures::batch_error_line("img-1", "owner-1", "content filtered"),
        fixtures::batch_line("img-2", "owner-1", &json!({ "amount": "-3", "merchant": "Kiosk" })),
    ];
    harness.put(RESULT_KEY, jsonl(&lines)).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.inserted, 3);
    assert_eq!(report.degraded, 2);

    let failed = harness.store.transaction_for_image("img-1").unwrap();
    assert_eq!(failed.status, TransactionStatus::NeedsReview);
    assert_eq!(
        failed.validation_errors.unwrap()["issues"][0]["message"],
        "content filtered"
    );

    let invalid = harness.store.transaction_for_image("img-2").unwrap();
    assert_eq!(invalid.status, TransactionStatus::NeedsReview);
    assert_eq!(invalid.merchant, "Kiosk");
    assert!(invalid.validation_errors.is_some());
}

#[tokio::test]
async fn invalid_image_keys_are_counted_as_failures() {
    let harness = Harness::new(Vec::new());
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));
    let mut lines = valid_lines(2);
    lines.push(json!({ "recordId": "x", "imageKey": "elsewhere/x.jpg" }).to_string());
    harness.put(RESULT_KEY, jsonl(&lines)).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.invalid_records, 1);
    assert_eq!(report.counts().failure, 1);
    assert_eq!(report.counts().total, 3);
    assert_eq!(harness.store.len(), 2);
}

#[tokio::test]
async fn replayed_file_converges() {
    let harness = Harness::new(Vec::new());
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));
    with_uploads(&harness, 5).await;
    harness.put(RESULT_KEY, jsonl(&valid_lines(5))).await;

    let first = ingest_batch(&harness.state, &output()).await;
    let second = ingest_batch(&harness.state, &output()).await;

    assert_eq!(first.inserted, 5);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 5);
    assert_eq!(second.migrated, 5);
    assert_eq!(second.migration_failures, 0);
    assert_eq!(harness.store.len(), 5);
    assert_eq!(harness.store.job("batch-1").unwrap().counts.success, 5);
}

#[tokio::test]
async fn redelivered_degraded_record_moves_image_to_stored_key() {
    let harness = Harness::new(Vec::new());
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));

    // Row written by an earlier delivery that crashed before migration.
    let stored_key = "receipts/2025/04/01/owner-1/img-9.jpg";
    let id = IdempotencyKey::for_batch_record("job-1", "img-9");
    let mut earlier = fixtures::transaction(id.as_str(), "img-9");
    earlier.image.key = stored_key.to_owned();
    harness.store.seed(earlier);

    harness.put("uploads/owner-1/img-9.jpg", &b"jpeg"[..]).await;
    let line = fixtures::batch_error_line("img-9", "owner-1", "throttled");
    harness.put(RESULT_KEY, jsonl(&[line])).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.duplicates, 1);
    assert_eq!(report.migrated, 1);
    assert_eq!(report.migration_failures, 0);

    let row = harness.store.transaction_for_image("img-9").unwrap();
    assert_eq!(row.image.key, stored_key);
    assert!(harness.exists(stored_key).await);
    assert!(!harness.exists("uploads/owner-1/img-9.jpg").await);
}

#[tokio::test]
async fn repeated_line_in_one_file_is_written_once() {
    let harness = Harness::new(Vec::new());
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));
    with_uploads(&harness, 2).await;
    let mut lines = valid_lines(2);
    lines.push(lines[0].clone());
    harness.put(RESULT_KEY, jsonl(&lines)).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.inserted, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.migrated, 2);
    assert_eq!(harness.store.len(), 2);
    assert_eq!(
        harness.store.job("batch-1").unwrap().counts,
        BatchCounts {
            success: 3,
            failure: 0,
            total: 3
        }
    );
}

#[tokio::test]
async fn oversized_line_is_a_parse_error() {
    let harness = Harness::new(Vec::new())
        .with_pipeline(PipelineConfig::default().with_max_line_bytes(1024));
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));
    let mut lines = valid_lines(2);
    lines.insert(1, format!(r#"{{"imageKey": "uploads/owner-1/big.jpg", "pad": "{}"}}"#, "x".repeat(4096)));
    harness.put(RESULT_KEY, jsonl(&lines)).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.lines, 3);
    assert_eq!(report.parse_errors, 1);
    assert_eq!(report.inserted, 2);
    assert!(harness.store.transaction_for_image("big").is_none());
}

#[tokio::test]
async fn mismatched_record_id_is_counted_and_keyed_by_image() {
    let harness = Harness::new(Vec::new());
    let line = json!({
        "recordId": "img-other",
        "imageKey": "uploads/owner-1/img-3.jpg",
        "modelOutput": { "content": [{ "text": fixtures::receipt_json().to_string() }] },
    })
    .to_string();
    harness.put(RESULT_KEY, jsonl(&[line])).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.record_id_mismatches, 1);
    assert_eq!(report.inserted, 1);
    assert!(harness.store.transaction_for_image("img-3").is_some());
}

#[tokio::test]
async fn job_update_failure_keeps_transactions() {
    let harness = Harness::new(Vec::new());
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));
    harness.store.fail_job_updates(true);
    harness.put(RESULT_KEY, jsonl(&valid_lines(4))).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert!(!report.job_completed);
    assert_eq!(harness.store.len(), 4);
    assert_eq!(
        harness.store.job("batch-1").unwrap().status,
        BatchJobStatus::Pending
    );
}

#[tokio::test]
async fn missing_job_and_missing_images_are_logged_only() {
    let harness = Harness::new(Vec::new());
    harness.put(RESULT_KEY, jsonl(&valid_lines(2))).await;

    let report = ingest_batch(&harness.state, &output()).await;

    assert_eq!(report.inserted, 2);
    assert_eq!(report.migration_failures, 2);
    assert!(!report.job_completed);
}

#[tokio::test]
async fn missing_result_file_reports_stream_error() {
    let harness = Harness::new(Vec::new());
    harness.store.insert_job(fixtures::batch_job("batch-1", "job-1"));

    let report = ingest_batch(&harness.state, &output()).await;

    assert!(report.stream_error.is_some());
    assert_eq!(report.lines, 0);
    assert!(!report.job_completed);
}
