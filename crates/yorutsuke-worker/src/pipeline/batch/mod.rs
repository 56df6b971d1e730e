//! Batch ingestion of a result file.
//!
//! The file is streamed line by line. Each line is parsed, validated and
//! buffered into a chunk; full chunks are written right away so memory use
//! stays bounded by the chunk size. After the last chunk the persisted
//! images are migrated to the key recorded on their transaction and the
//! parent job is completed with the aggregate counts.

mod reader;
mod record;
mod writer;

use std::collections::HashSet;

use jiff::Timestamp;
use jiff::tz::TimeZone;
use yorutsuke_core::TransactionStore;
use yorutsuke_core::types::BatchCounts;
use yorutsuke_object::keys::{BatchOutputKey, UploadKey};

pub use self::record::{BatchRecord, ContentBlock, ModelError, ModelOutput};
use self::reader::ResultReader;
use self::record::{Candidate, InvalidRecord, RecordContext};
use self::writer::ChunkWriter;
use crate::{TRACING_TARGET_BATCH, WorkerState};

/// Outcome of ingesting one result file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Job identifier taken from the result path.
    pub job_id: String,
    /// Result file key.
    pub key: String,
    /// Non-blank lines read.
    pub lines: u64,
    /// Lines that were not valid records, oversized lines included.
    pub parse_errors: u64,
    /// Records whose record id differs from their image key stem.
    pub record_id_mismatches: u64,
    /// Records whose image key is not a temporary upload.
    pub invalid_records: u64,
    /// Records persisted in degraded form.
    pub degraded: u64,
    /// Transactions written by this run.
    pub inserted: u64,
    /// Transactions that already existed.
    pub duplicates: u64,
    /// Records not written after every retry.
    pub write_failures: u64,
    /// Images moved to their dated permanent key.
    pub migrated: u64,
    /// Images that could not be moved.
    pub migration_failures: u64,
    /// Whether the parent job was marked completed.
    pub job_completed: bool,
    /// Set when the result file could not be read to the end.
    pub stream_error: Option<String>,
}

impl BatchReport {
    fn new(output: &BatchOutputKey) -> Self {
        Self {
            job_id: output.job_id().to_owned(),
            key: output.key(),
            ..Default::default()
        }
    }

    /// Returns the counts recorded on the parent job.
    ///
    /// Success counts persisted records, written or already present;
    /// failure counts parse errors, invalid records and write failures.
    pub fn counts(&self) -> BatchCounts {
        BatchCounts {
            success: self.inserted + self.duplicates,
            failure: self.parse_errors + self.invalid_records + self.write_failures,
            total: self.lines,
        }
    }
}

/// A persisted image awaiting migration.
struct Migration {
    upload: UploadKey,
    destination: String,
}

/// Ingests one result file. Never fails; problems end up in the report.
#[tracing::instrument(
    name = "batch.ingest",
    skip_all,
    fields(job_id = %output.job_id(), file = %output.file_name())
)]
pub async fn ingest_batch(state: &WorkerState, output: &BatchOutputKey) -> BatchReport {
    let mut report = BatchReport::new(output);

    let max_line_bytes = state.pipeline.max_line_bytes;
    let mut reader = match ResultReader::open(&state.objects, &report.key, max_line_bytes).await {
        Ok(reader) => reader,
        Err(err) => {
            tracing::error!(
                target: TRACING_TARGET_BATCH,
                key = %report.key,
                error = %err,
                "failed to open result file"
            );
            report.stream_error = Some(err.to_string());
            return report;
        }
    };

    let now = Timestamp::now();
    let ctx = RecordContext {
        job_id: output.job_id(),
        bucket: &state.bucket,
        now,
        fallback_date: now.to_zoned(TimeZone::UTC).date(),
        expires_at: state.pipeline.expires_at(now),
    };

    let chunk_size = state
        .pipeline
        .effective_chunk_size(state.transactions.max_batch_size());
    let writer = ChunkWriter::new(state.transactions.as_ref(), state.pipeline.retry());
    let mut chunk: Vec<Candidate> = Vec::with_capacity(chunk_size);
    let mut migrations: Vec<Migration> = Vec::new();

    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(
                    target: TRACING_TARGET_BATCH,
                    key = %report.key,
                    lines = report.lines,
                    error = %err,
                    "result file stream failed"
                );
                report.stream_error = Some(err.to_string());
                break;
            }
        };
        report.lines += 1;

        if line.oversized {
            tracing::warn!(
                target: TRACING_TARGET_BATCH,
                line = line.number,
                max_line_bytes,
                "skipping oversized line"
            );
            report.parse_errors += 1;
            continue;
        }

        let record = match BatchRecord::parse(&line.bytes) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_BATCH,
                    line = line.number,
                    error = %err,
                    "skipping malformed line"
                );
                report.parse_errors += 1;
                continue;
            }
        };

        match record.into_candidate(&ctx) {
            Ok(candidate) => {
                if candidate.record_id_mismatch {
                    tracing::warn!(
                        target: TRACING_TARGET_BATCH,
                        line = line.number,
                        image_id = %candidate.upload.image_id(),
                        "record id does not match image key"
                    );
                    report.record_id_mismatches += 1;
                }
                if candidate.transaction.is_degraded() {
                    report.degraded += 1;
                }
                chunk.push(candidate);
            }
            Err(InvalidRecord::ImageKey(image_key)) => {
                tracing::warn!(
                    target: TRACING_TARGET_BATCH,
                    line = line.number,
                    image_key = %image_key,
                    "record image key is not a temporary upload"
                );
                report.invalid_records += 1;
            }
        }

        if chunk.len() >= chunk_size {
            let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
            flush(state, &writer, full, &mut report, &mut migrations).await;
        }
    }

    if !chunk.is_empty() {
        flush(state, &writer, chunk, &mut report, &mut migrations).await;
    }

    migrate(state, migrations, &mut report).await;

    if report.stream_error.is_none() {
        complete_job(state, &mut report).await;
    }

    tracing::info!(
        target: TRACING_TARGET_BATCH,
        job_id = %report.job_id,
        lines = report.lines,
        inserted = report.inserted,
        duplicates = report.duplicates,
        degraded = report.degraded,
        parse_errors = report.parse_errors,
        record_id_mismatches = report.record_id_mismatches,
        invalid_records = report.invalid_records,
        write_failures = report.write_failures,
        migrated = report.migrated,
        job_completed = report.job_completed,
        "result file ingested"
    );

    report
}

async fn flush(
    state: &WorkerState,
    writer: &ChunkWriter<'_>,
    chunk: Vec<Candidate>,
    report: &mut BatchReport,
    migrations: &mut Vec<Migration>,
) {
    let transactions = chunk.iter().map(|c| c.transaction.clone()).collect();
    let outcome = writer.write(transactions).await;

    report.inserted += outcome.inserted.len() as u64;
    report.duplicates += outcome.duplicates.len() as u64;
    report.write_failures += outcome.failed.len() as u64;

    let failed: HashSet<&str> = outcome.failed.iter().map(|t| t.id.as_str()).collect();
    let duplicates: HashSet<&str> = outcome.duplicates.iter().map(String::as_str).collect();

    for candidate in chunk {
        let id = candidate.transaction.id.as_str();
        if failed.contains(id) {
            continue;
        }

        let destination = if duplicates.contains(id) {
            match stored_image_key(state.transactions.as_ref(), &candidate).await {
                Some(key) => key,
                None => {
                    report.migration_failures += 1;
                    continue;
                }
            }
        } else {
            candidate.transaction.image.key
        };

        migrations.push(Migration {
            destination,
            upload: candidate.upload,
        });
    }
}

/// Returns the image key of the transaction already stored for a duplicate.
///
/// The stored row is authoritative: a degraded record rebuilt on another day
/// derives a different dated key than the one persisted.
async fn stored_image_key(store: &dyn TransactionStore, candidate: &Candidate) -> Option<String> {
    let image_id = candidate.transaction.image_id.as_str();
    match store.image_key_for(image_id).await {
        Ok(Some(key)) => Some(key),
        Ok(None) => {
            tracing::warn!(
                target: TRACING_TARGET_BATCH,
                image_id = %image_id,
                "duplicate has no stored transaction, upload left in place"
            );
            None
        }
        Err(err) => {
            tracing::warn!(
                target: TRACING_TARGET_BATCH,
                image_id = %image_id,
                error = %err,
                "stored image key lookup failed, upload left in place"
            );
            None
        }
    }
}

/// Moves persisted images to their dated keys.
///
/// A source that is gone while the destination exists was migrated by an
/// earlier delivery.
async fn migrate(state: &WorkerState, migrations: Vec<Migration>, report: &mut BatchReport) {
    let mut seen = HashSet::new();

    for migration in migrations {
        let source = migration.upload.key();
        if !seen.insert(source.clone()) {
            continue;
        }

        match move_object(state, &source, &migration.destination).await {
            Ok(()) => report.migrated += 1,
            Err(reason) => {
                tracing::warn!(
                    target: TRACING_TARGET_BATCH,
                    source = %source,
                    destination = %migration.destination,
                    reason = %reason,
                    "image migration failed"
                );
                report.migration_failures += 1;
            }
        }
    }
}

async fn move_object(state: &WorkerState, source: &str, destination: &str) -> Result<(), String> {
    match state.objects.copy(source, destination).await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            return match state.objects.exists(destination).await {
                Ok(true) => Ok(()),
                Ok(false) => Err("source missing and destination absent".to_owned()),
                Err(err) => Err(format!("destination check failed: {err}")),
            };
        }
        Err(err) => return Err(format!("copy failed: {err}")),
    }

    match state.objects.exists(destination).await {
        Ok(true) => {}
        Ok(false) => return Err("copy not visible at destination".to_owned()),
        Err(err) => return Err(format!("destination check failed: {err}")),
    }

    match state.objects.delete(source).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => {
            tracing::warn!(
                target: TRACING_TARGET_BATCH,
                source = %source,
                error = %err,
                "failed to delete migrated upload"
            );
            Ok(())
        }
    }
}

/// Marks the parent job completed. Failures are logged only; written
/// transactions stay.
async fn complete_job(state: &WorkerState, report: &mut BatchReport) {
    let job = match state.jobs.find_by_correlation_id(&report.job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::warn!(
                target: TRACING_TARGET_BATCH,
                correlation_id = %report.job_id,
                "no batch job for correlation id"
            );
            return;
        }
        Err(err) => {
            tracing::error!(
                target: TRACING_TARGET_BATCH,
                correlation_id = %report.job_id,
                error = %err,
                "batch job lookup failed"
            );
            return;
        }
    };

    let counts = report.counts();
    match state.jobs.mark_completed(&job.id, counts).await {
        Ok(()) => {
            report.job_completed = true;
            tracing::info!(
                target: TRACING_TARGET_BATCH,
                batch_job_id = %job.id,
                was_completed = job.is_completed(),
                success = counts.success,
                failure = counts.failure,
                total = counts.total,
                "batch job completed"
            );
        }
        Err(err) => {
            tracing::error!(
                target: TRACING_TARGET_BATCH,
                batch_job_id = %job.id,
                error = %err,
                "failed to complete batch job"
            );
        }
    }
}
