//! Mock extraction backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use yorutsuke_core::types::{BackendKind, ExtractionResult, ReceiptImage};
use yorutsuke_core::{Error, ExtractionBackend, Result};

/// What a [`MockBackend`] does when invoked.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Returns this result.
    Succeed(ExtractionResult),
    /// Returns an external error with this message.
    Fail(String),
    /// Never returns.
    Hang,
    /// Panics.
    Panic,
}

/// An [`ExtractionBackend`] with scripted behavior.
#[derive(Debug)]
pub struct MockBackend {
    kind: BackendKind,
    model: String,
    behavior: MockBehavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockBackend {
    /// Creates a backend with the given behavior.
    pub fn new(kind: BackendKind, behavior: MockBehavior) -> Self {
        Self {
            kind,
            model: format!("mock-{kind}"),
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a backend that returns `result`; its kind is taken from it.
    pub fn succeeding(result: ExtractionResult) -> Self {
        let model = result.model.clone();
        Self {
            model,
            ..Self::new(result.backend, MockBehavior::Succeed(result))
        }
    }

    /// Creates a backend that fails with `message`.
    pub fn failing(kind: BackendKind, message: impl Into<String>) -> Self {
        Self::new(kind, MockBehavior::Fail(message.into()))
    }

    /// Creates a backend that never answers.
    pub fn hanging(kind: BackendKind) -> Self {
        Self::new(kind, MockBehavior::Hang)
    }

    /// Creates a backend that panics.
    pub fn panicking(kind: BackendKind) -> Self {
        Self::new(kind, MockBehavior::Panic)
    }

    /// Sleeps for `delay` before behaving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns how many times [`extract`](ExtractionBackend::extract) ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn extract(&self, _image: &ReceiptImage) -> Result<ExtractionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            MockBehavior::Succeed(result) => Ok(result.clone()),
            MockBehavior::Fail(message) => Err(Error::external_error().with_message(message.clone())),
            MockBehavior::Hang => std::future::pending().await,
            MockBehavior::Panic => panic!("mock backend {} panicked", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn counts_calls_and_returns_scripted_result() {
        let backend = MockBackend::succeeding(fixtures::extraction(BackendKind::Gemini, 10.0));
        let image = fixtures::image("img-1");

        let result = backend.extract(&image).await.unwrap();
        assert_eq!(result.total, Some(10.0));
        assert_eq!(backend.kind(), BackendKind::Gemini);

        backend.extract(&image).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn failing_backend_errors() {
        let backend = MockBackend::failing(BackendKind::OpenAi, "quota exceeded");
        let err = backend.extract(&fixtures::image("img-1")).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
