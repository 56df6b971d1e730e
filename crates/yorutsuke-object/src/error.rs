//! Error type for object-store operations.

use std::fmt;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for Results with the object-store [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An object-store error carrying a message, an optional source, and
/// flags describing how the caller should react.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    message: String,
    #[source]
    source: Option<BoxedError>,
    retryable: bool,
    not_found: bool,
}

impl Error {
    /// Create a runtime error formatted as `[{label}] {msg}`.
    pub fn runtime(msg: impl fmt::Display, label: &str, retryable: bool) -> Self {
        Self {
            message: format!("[{label}] {msg}"),
            source: None,
            retryable,
            not_found: false,
        }
    }

    /// Create a connection error formatted as `[{label}] {msg}`.
    pub fn connection(msg: impl fmt::Display, label: &str) -> Self {
        Self {
            message: format!("[{label}] {msg}"),
            source: None,
            retryable: true,
            not_found: false,
        }
    }

    /// Create a not-found error for `key`.
    pub fn not_found(key: &str, label: &str) -> Self {
        Self {
            message: format!("[{label}] object not found: {key}"),
            source: None,
            retryable: false,
            not_found: true,
        }
    }

    /// Attach a source error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether the caller should retry this operation.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Whether the object does not exist.
    pub fn is_not_found(&self) -> bool {
        self.not_found
    }
}
