//! Worker configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use yorutsuke_inference::InferenceConfig;
use yorutsuke_object::providers::S3Config;
use yorutsuke_postgres::PgConfig;

use crate::RetryConfig;

/// Default number of records per batch write.
pub const DEFAULT_CHUNK_SIZE: usize = 25;

/// Default number of retries for unprocessed batch items.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first batch-write retry, in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Default upper bound on a batch-write retry delay, in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Default cap on one result-file line, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Default confidence below which a valid record needs review.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Default tolerance when comparing totals across backends.
pub const DEFAULT_TOTAL_TOLERANCE: f64 = 0.01;

/// Pipeline behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct PipelineConfig {
    /// Records per batch write; clamped to the store's limit.
    #[cfg_attr(
        feature = "config",
        arg(long = "batch-chunk-size", env = "BATCH_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)
    )]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Retries for items a batch write left unprocessed.
    #[cfg_attr(
        feature = "config",
        arg(long = "batch-max-retries", env = "BATCH_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)
    )]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds; doubles per retry.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "batch-retry-base-delay-ms",
            env = "BATCH_RETRY_BASE_DELAY_MS",
            default_value_t = DEFAULT_RETRY_BASE_DELAY_MS
        )
    )]
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single retry delay, in milliseconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "batch-retry-max-delay-ms",
            env = "BATCH_RETRY_MAX_DELAY_MS",
            default_value_t = DEFAULT_RETRY_MAX_DELAY_MS
        )
    )]
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Longest result-file line accepted; longer lines count as parse errors.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "batch-max-line-bytes",
            env = "BATCH_MAX_LINE_BYTES",
            default_value_t = DEFAULT_MAX_LINE_BYTES
        )
    )]
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// Confidence below which a valid record is stored as `needs_review`.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "confidence-threshold",
            env = "CONFIDENCE_THRESHOLD",
            default_value_t = DEFAULT_CONFIDENCE_THRESHOLD
        )
    )]
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Largest difference between backend totals still treated as agreement.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "total-tolerance",
            env = "TOTAL_TOLERANCE",
            default_value_t = DEFAULT_TOTAL_TOLERANCE
        )
    )]
    #[serde(default = "default_total_tolerance")]
    pub total_tolerance: f64,

    /// Days after which a transaction expires; unset means never.
    #[cfg_attr(feature = "config", arg(long = "transaction-ttl-days", env = "TRANSACTION_TTL_DAYS"))]
    #[serde(default)]
    pub ttl_days: Option<u32>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_total_tolerance() -> f64 {
    DEFAULT_TOTAL_TOLERANCE
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            total_tolerance: DEFAULT_TOTAL_TOLERANCE,
            ttl_days: None,
        }
    }
}

impl PipelineConfig {
    /// Returns the chunk size clamped to `1..=store_limit`.
    pub fn effective_chunk_size(&self, store_limit: usize) -> usize {
        self.chunk_size.clamp(1, store_limit.max(1))
    }

    /// Returns the retry schedule for unprocessed batch items.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
        .with_max_backoff(Duration::from_millis(self.retry_max_delay_ms))
    }

    /// Returns the expiry for a record created at `now`, if a TTL is set.
    pub fn expires_at(&self, now: Timestamp) -> Option<Timestamp> {
        let days = self.ttl_days?;
        now.checked_add(SignedDuration::from_hours(i64::from(days) * 24))
            .ok()
    }

    /// Sets the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the retry bounds.
    pub fn with_retries(mut self, max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self.retry_max_delay_ms = max_delay_ms;
        self
    }

    /// Sets the result-file line cap.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Sets the confidence threshold.
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Sets the transaction TTL.
    pub fn with_ttl_days(mut self, days: u32) -> Self {
        self.ttl_days = Some(days);
        self
    }
}

/// Complete worker configuration.
///
/// Combines connection configuration for external services with pipeline
/// behavior settings. This is the main configuration type passed to
/// [`WorkerState::from_config`].
///
/// [`WorkerState::from_config`]: super::WorkerState::from_config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct WorkerConfig {
    /// Postgres database configuration.
    #[cfg_attr(feature = "config", command(flatten))]
    pub postgres: PgConfig,

    /// Object storage configuration.
    #[cfg_attr(feature = "config", command(flatten))]
    pub s3: S3Config,

    /// Extraction backend configuration.
    #[cfg_attr(feature = "config", command(flatten))]
    pub inference: InferenceConfig,

    /// Pipeline behavior.
    #[cfg_attr(feature = "config", command(flatten))]
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl WorkerConfig {
    /// Creates a new worker configuration with default pipeline settings.
    pub fn new(postgres: PgConfig, s3: S3Config, inference: InferenceConfig) -> Self {
        Self {
            postgres,
            s3,
            inference,
            pipeline: PipelineConfig::default(),
        }
    }

    /// Replaces the pipeline settings.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_clamped() {
        let config = PipelineConfig::default().with_chunk_size(100);
        assert_eq!(config.effective_chunk_size(25), 25);

        let config = PipelineConfig::default().with_chunk_size(0);
        assert_eq!(config.effective_chunk_size(25), 1);

        let config = PipelineConfig::default().with_chunk_size(10);
        assert_eq!(config.effective_chunk_size(25), 10);
    }

    #[test]
    fn retry_schedule_follows_settings() {
        let retry = PipelineConfig::default().with_retries(4, 50, 300).retry();
        assert_eq!(retry.max_retries, 4);
        assert_eq!(retry.calculate_backoff(0), Duration::from_millis(50));
        assert_eq!(retry.calculate_backoff(1), Duration::from_millis(100));
        assert_eq!(retry.calculate_backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn ttl_sets_expiry() {
        let now = Timestamp::UNIX_EPOCH;
        assert_eq!(PipelineConfig::default().expires_at(now), None);

        let expires = PipelineConfig::default().with_ttl_days(2).expires_at(now).unwrap();
        assert_eq!(expires.as_second(), 2 * 24 * 3600);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "chunk_size": 10 }"#).unwrap();
        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.ttl_days, None);
        assert_eq!(config.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
    }
}
