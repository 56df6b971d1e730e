//! Worker error types.

use std::borrow::Cow;

/// Result type alias for worker operations.
pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

/// Worker error type.
///
/// Only setup problems and malformed trigger events surface as errors;
/// per-record problems end up in pipeline reports.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A trigger event could not be parsed.
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] serde_json::Error),

    /// Object storage operation failed.
    #[error("object store error: {0}")]
    Object(#[from] yorutsuke_object::Error),

    /// Database setup failed.
    #[error("database error: {0}")]
    Database(#[from] yorutsuke_postgres::PgError),

    /// Backend setup failed.
    #[error("inference error: {0}")]
    Inference(#[from] yorutsuke_inference::Error),

    /// Store or backend capability failed.
    #[error("store error: {0}")]
    Store(#[from] yorutsuke_core::Error),

    /// Reading a result file failed mid-stream.
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// Failed to process a job.
    #[error("processing failed: {message}")]
    Processing {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl WorkerError {
    /// Creates a processing error with a message.
    pub fn processing(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a processing error with a message and source.
    pub fn processing_with_source(
        message: impl Into<Cow<'static, str>>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
