//! CLI configuration.
//!
//! ```text
//! Cli
//! ├── log_format: LogFormat         # human or JSON log lines
//! └── command: Command
//!     ├── image | batch | event | reconcile
//!     │   └── worker: WorkerConfig  # Postgres, S3, backends, pipeline
//!     └── migrate
//!         └── postgres: PgConfig
//! ```
//!
//! All configuration can be provided via CLI arguments or environment
//! variables. Use `--help` on any subcommand to see its options.

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use yorutsuke_postgres::PgConfig;
use yorutsuke_worker::WorkerConfig;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "yorutsuke")]
#[command(about = "Receipt ingestion worker")]
#[command(version)]
pub struct Cli {
    /// Log line format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Subcommands; each runs once and exits.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Runs the single-image pipeline for one temporary upload key.
    Image(ImageArgs),
    /// Ingests one batch result file.
    Batch(BatchArgs),
    /// Dispatches an object-created notification.
    Event(EventArgs),
    /// Reports permanent receipts without a transaction.
    Reconcile(ReconcileArgs),
    /// Applies pending database migrations.
    Migrate(MigrateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ImageArgs {
    /// Object key under `uploads/`.
    pub key: String,

    #[command(flatten)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    /// Object key under `batch-output/`.
    pub key: String,

    #[command(flatten)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Args)]
pub struct EventArgs {
    /// Notification body; read from stdin when omitted or `-`.
    pub path: Option<PathBuf>,

    #[command(flatten)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Args)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub postgres: PgConfig,
}

impl Command {
    /// Subcommand name as typed.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Batch(_) => "batch",
            Self::Event(_) => "event",
            Self::Reconcile(_) => "reconcile",
            Self::Migrate(_) => "migrate",
        }
    }

    /// Worker configuration, for subcommands that run a pipeline.
    pub fn worker(&self) -> Option<&WorkerConfig> {
        match self {
            Self::Image(args) => Some(&args.worker),
            Self::Batch(args) => Some(&args.worker),
            Self::Event(args) => Some(&args.worker),
            Self::Reconcile(args) => Some(&args.worker),
            Self::Migrate(_) => None,
        }
    }
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded first so clap's `env` fallbacks see its values.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Logs configuration (no secrets).
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "build information"
        );

        let Some(worker) = self.command.worker() else {
            tracing::info!(target: TRACING_TARGET_CONFIG, command = self.command.name(), "configuration");
            return;
        };

        let pipeline = &worker.pipeline;
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            command = self.command.name(),
            bucket = %worker.s3.bucket,
            region = %worker.s3.region,
            postgres_max_connections = worker.postgres.postgres_max_connections,
            primary_backend = ?worker.inference.primary_backend,
            chunk_size = pipeline.chunk_size,
            max_retries = pipeline.max_retries,
            confidence_threshold = pipeline.confidence_threshold,
            ttl_days = ?pipeline.ttl_days,
            "configuration"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_migrate_with_postgres_only() {
        let cli = Cli::try_parse_from([
            "yorutsuke",
            "--log-format",
            "json",
            "migrate",
            "--postgres-url",
            "postgresql://localhost/yorutsuke",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Command::Migrate(_)));
        assert!(cli.command.worker().is_none());
    }
}
