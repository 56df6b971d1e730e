//! Worker application state.

use std::fmt;
use std::sync::Arc;

use yorutsuke_core::types::BackendKind;
use yorutsuke_core::{BatchJobStore, TransactionStore};
use yorutsuke_inference::Comparator;
use yorutsuke_object::ObjectStoreClient;
use yorutsuke_object::providers::S3Provider;
use yorutsuke_postgres::{PgClient, PgStore};

use super::{PipelineConfig, WorkerConfig};
use crate::{Result, WorkerError};

/// Application state for the ingestion pipelines.
///
/// Cheap to clone; every pipeline invocation borrows it and keeps no
/// mutable state of its own between invocations.
#[derive(Clone)]
pub struct WorkerState {
    /// Transaction persistence.
    pub transactions: Arc<dyn TransactionStore>,
    /// Batch job persistence.
    pub jobs: Arc<dyn BatchJobStore>,
    /// Object storage for uploads, receipts and result files.
    pub objects: ObjectStoreClient,
    /// Bucket name recorded in transaction image locations.
    pub bucket: String,
    /// Fan-out over the configured extraction backends.
    pub comparator: Comparator,
    /// Backend whose successful result is preferred.
    pub primary_backend: Option<BackendKind>,
    /// Pipeline behavior.
    pub pipeline: PipelineConfig,
}

impl WorkerState {
    /// Creates a new worker state from existing service instances.
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        jobs: Arc<dyn BatchJobStore>,
        objects: ObjectStoreClient,
        bucket: impl Into<String>,
        comparator: Comparator,
    ) -> Self {
        Self {
            transactions,
            jobs,
            objects,
            bucket: bucket.into(),
            comparator,
            primary_backend: None,
            pipeline: PipelineConfig::default(),
        }
    }

    /// Sets the preferred backend.
    pub fn with_primary_backend(mut self, primary_backend: BackendKind) -> Self {
        self.primary_backend = Some(primary_backend);
        self
    }

    /// Replaces the pipeline settings.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Creates a new worker state from configuration.
    ///
    /// Builds the Postgres pool, the S3 client and every backend whose
    /// credentials are present.
    ///
    /// # Errors
    ///
    /// Returns an error if a client cannot be created or a backend
    /// configuration is invalid.
    pub async fn from_config(config: &WorkerConfig) -> Result<Self> {
        let postgres = PgClient::new(config.postgres.clone()).map_err(|e| {
            WorkerError::processing_with_source("Failed to create database client", e)
        })?;
        let store = Arc::new(PgStore::new(postgres));

        let objects = S3Provider::connect(&config.s3)?;
        objects.verify_reachable().await?;

        let comparator = config.inference.build_comparator()?;

        Ok(Self {
            transactions: store.clone(),
            jobs: store,
            objects,
            bucket: config.s3.bucket.clone(),
            comparator,
            primary_backend: config.inference.primary_backend,
            pipeline: config.pipeline.clone(),
        })
    }
}

impl fmt::Debug for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerState")
            .field("bucket", &self.bucket)
            .field("backends", &self.comparator.kinds())
            .field("primary_backend", &self.primary_backend)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}
