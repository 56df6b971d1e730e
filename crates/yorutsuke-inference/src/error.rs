//! Error types for extraction backends.

use std::time::Duration;

use yorutsuke_core::ErrorKind;

/// Result type for all backend operations in this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for backend invocations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP client/connection errors.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors when sending or receiving data.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing errors.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Reading a local resource failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend did not finish in time.
    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The backend answered with a non-success status.
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// The backend answered but the body is not what was expected.
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// An asynchronous analysis reached a failed terminal state.
    #[error("Analysis failed: {reason}")]
    AnalysisFailed { reason: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create an API error.
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Create an analysis failed error.
    pub fn analysis_failed(reason: impl Into<String>) -> Self {
        Self::AnalysisFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a timeout error with the given duration.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(err) => err.is_timeout() || err.is_connect(),
            Error::Timeout { .. } => true,
            Error::ApiError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Error::Http(err) if err.is_timeout() => ErrorKind::Timeout,
            Error::Http(_) => ErrorKind::NetworkError,
            Error::Serialization(_) | Error::InvalidResponse { .. } => ErrorKind::Serialization,
            Error::UrlParse(_) | Error::InvalidConfig { .. } => ErrorKind::Configuration,
            Error::Io(_) => ErrorKind::InternalError,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::ApiError { status: 401 | 403, .. } => ErrorKind::Authentication,
            Error::ApiError { status: 429, .. } => ErrorKind::RateLimited,
            Error::ApiError { status, .. } if *status >= 500 => ErrorKind::ServiceUnavailable,
            Error::ApiError { .. } | Error::AnalysisFailed { .. } => ErrorKind::ExternalError,
        }
    }
}

impl From<Error> for yorutsuke_core::Error {
    fn from(err: Error) -> Self {
        yorutsuke_core::Error::new(err.kind())
            .with_message(err.to_string())
            .with_source(err)
    }
}

macro_rules! impl_from_builder_error {
    ($($builder_error:ty),+ $(,)?) => {
        $(
            impl From<$builder_error> for Error {
                fn from(err: $builder_error) -> Self {
                    Error::InvalidConfig {
                        reason: err.to_string(),
                    }
                }
            }
        )+
    };
}

impl_from_builder_error!(
    crate::backends::OpenAiBuilderError,
    crate::backends::GeminiBuilderError,
    crate::backends::AzureBuilderError,
    crate::backends::OllamaBuilderError,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        assert!(Error::api_error(503, "busy").is_retryable());
        assert!(Error::api_error(429, "slow down").is_retryable());
        assert!(!Error::api_error(400, "bad image").is_retryable());
        assert!(Error::timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn maps_to_core_error_kinds() {
        let core: yorutsuke_core::Error = Error::api_error(401, "bad key").into();
        assert_eq!(core.kind(), ErrorKind::Authentication);

        let core: yorutsuke_core::Error = Error::timeout(Duration::from_secs(5)).into();
        assert!(core.is_transient());

        let core: yorutsuke_core::Error = Error::invalid_response("no choices").into();
        assert_eq!(core.kind(), ErrorKind::Serialization);
    }
}
