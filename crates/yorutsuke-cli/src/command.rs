//! Subcommand execution.

use std::path::Path;

use anyhow::{Context, bail};
use tokio::io::AsyncReadExt;
use yorutsuke_object::keys::BatchOutputKey;
use yorutsuke_postgres::{PgClient, PgClientMigrationExt, PgConfig};
use yorutsuke_worker::event::{self, DispatchOutcome};
use yorutsuke_worker::pipeline::{self, BatchReport, ImageReport};
use yorutsuke_worker::{WorkerConfig, WorkerState, reconcile};

use crate::TRACING_TARGET_COMMAND;
use crate::config::Command;

/// Runs one subcommand to completion.
///
/// Per-record problems are reported, not returned; only setup failures and
/// an unreadable batch file fail the command so the caller can redeliver.
pub async fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Image(args) => {
            let state = create_state(&args.worker).await?;
            let report = pipeline::ingest_image(&state, &args.key).await;
            log_image(&report);
            Ok(())
        }
        Command::Batch(args) => {
            let output = BatchOutputKey::parse(&args.key)
                .with_context(|| format!("not a batch output key: {}", args.key))?;
            let state = create_state(&args.worker).await?;
            let report = pipeline::ingest_batch(&state, &output).await;
            log_batch(&report)
        }
        Command::Event(args) => {
            let body = read_body(args.path.as_deref()).await?;
            let events = event::parse_notification(&body).context("invalid notification body")?;
            let state = create_state(&args.worker).await?;

            let mut stream_errors = 0;
            for outcome in event::dispatch(&state, &events).await {
                match outcome {
                    DispatchOutcome::Image(report) => log_image(&report),
                    DispatchOutcome::Batch(report) => {
                        if log_batch(&report).is_err() {
                            stream_errors += 1;
                        }
                    }
                    DispatchOutcome::Ignored { key, reason } => {
                        tracing::info!(target: TRACING_TARGET_COMMAND, key = %key, reason, "event ignored");
                    }
                }
            }

            if stream_errors > 0 {
                bail!("{stream_errors} result file(s) could not be read to the end");
            }
            Ok(())
        }
        Command::Reconcile(args) => {
            let state = create_state(&args.worker).await?;
            let report = reconcile::reconcile(&state)
                .await
                .context("reconciliation sweep failed")?;

            for orphan in &report.orphans {
                println!("{}\t{}\t{}", orphan.owner_id, orphan.image_id, orphan.key);
            }
            tracing::info!(
                target: TRACING_TARGET_COMMAND,
                scanned = report.scanned,
                orphans = report.orphans.len(),
                unrecognized = report.unrecognized,
                lookup_errors = report.lookup_errors,
                "reconciliation finished"
            );
            Ok(())
        }
        Command::Migrate(args) => migrate(args.postgres).await,
    }
}

async fn create_state(config: &WorkerConfig) -> anyhow::Result<WorkerState> {
    WorkerState::from_config(config)
        .await
        .context("failed to create worker state")
}

async fn migrate(config: PgConfig) -> anyhow::Result<()> {
    let client = PgClient::new(config).context("failed to create database client")?;
    let result = client
        .run_pending_migrations()
        .await
        .context("failed to apply migrations")?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        applied = ?result.applied_versions,
        duration_ms = result.duration.as_millis(),
        "database schema up to date"
    );
    Ok(())
}

async fn read_body(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .context("failed to read stdin")?;
            Ok(body)
        }
    }
}

fn log_image(report: &ImageReport) {
    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        key = %report.key,
        stage = %report.stage,
        transaction_id = ?report.transaction_id,
        status = ?report.status,
        degraded = report.degraded,
        resumed = report.resumed,
        skip_reason = ?report.skip_reason,
        "image run finished"
    );
}

fn log_batch(report: &BatchReport) -> anyhow::Result<()> {
    let counts = report.counts();
    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        key = %report.key,
        success = counts.success,
        failure = counts.failure,
        total = counts.total,
        migrated = report.migrated,
        migration_failures = report.migration_failures,
        job_completed = report.job_completed,
        "batch run finished"
    );

    if let Some(error) = &report.stream_error {
        bail!("result file {} could not be read: {error}", report.key);
    }
    Ok(())
}
