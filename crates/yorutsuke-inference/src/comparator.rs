//! Concurrent fan-out over every configured backend.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use yorutsuke_core::ExtractionBackend;
use yorutsuke_core::types::{BackendKind, ComparisonResult, ExtractionResult, ReceiptImage};

use crate::TRACING_TARGET_COMPARATOR;

/// Default per-backend time limit.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(90);

/// Runs all backends against one image and aggregates their results.
///
/// Each backend runs in its own task. An error, a timeout or a panic in one
/// backend is recorded in that backend's slot and never affects the others.
#[derive(Clone)]
pub struct Comparator {
    backends: Vec<Arc<dyn ExtractionBackend>>,
    timeout: Duration,
}

impl Comparator {
    /// Creates a comparator over `backends`, in slot order.
    pub fn new(backends: Vec<Arc<dyn ExtractionBackend>>) -> Self {
        Self {
            backends,
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    /// Sets the per-backend time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured backends.
    pub fn backends(&self) -> &[Arc<dyn ExtractionBackend>] {
        &self.backends
    }

    /// Returns the kinds of the configured backends, in slot order.
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Returns the per-backend time limit.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs every backend concurrently against `image`.
    ///
    /// Always returns one slot per backend, in configuration order.
    #[tracing::instrument(
        name = "comparator.compare",
        skip_all,
        fields(image_id = %image.image_id, backends = self.backends.len())
    )]
    pub async fn compare(&self, image: &ReceiptImage) -> ComparisonResult {
        let started_at = Instant::now();

        let handles: Vec<_> = self
            .backends
            .iter()
            .map(|backend| {
                let backend = Arc::clone(backend);
                let image = image.clone();
                let timeout = self.timeout;
                tokio::spawn(async move { run_isolated(backend.as_ref(), &image, timeout).await })
            })
            .collect();

        let results = join_all(handles)
            .await
            .into_iter()
            .zip(&self.backends)
            .map(|(joined, backend)| {
                joined.unwrap_or_else(|err| {
                    let reason = if err.is_panic() {
                        "backend task panicked"
                    } else {
                        "backend task was cancelled"
                    };
                    tracing::error!(
                        target: TRACING_TARGET_COMPARATOR,
                        backend = %backend.kind(),
                        image_id = %image.image_id,
                        reason,
                        "backend task did not complete"
                    );
                    ExtractionResult::failed(backend.kind(), backend.model(), reason)
                })
            })
            .collect();

        let comparison = ComparisonResult::from_results(image.image_id.clone(), results);

        tracing::info!(
            target: TRACING_TARGET_COMPARATOR,
            image_id = %image.image_id,
            status = %comparison.status,
            success_count = comparison.success_count,
            failure_count = comparison.failure_count,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "comparison finished"
        );

        comparison
    }
}

impl std::fmt::Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparator")
            .field("backends", &self.kinds())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Runs one backend, turning every failure into a failed slot.
async fn run_isolated(
    backend: &dyn ExtractionBackend,
    image: &ReceiptImage,
    timeout: Duration,
) -> ExtractionResult {
    let started_at = Instant::now();
    let outcome = tokio::time::timeout(timeout, backend.extract(image)).await;
    let elapsed_ms = started_at.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => ExtractionResult::failed(backend.kind(), backend.model(), err.to_string())
            .with_elapsed_ms(elapsed_ms),
        Err(_) => {
            tracing::warn!(
                target: TRACING_TARGET_COMPARATOR,
                backend = %backend.kind(),
                image_id = %image.image_id,
                timeout_ms = timeout.as_millis() as u64,
                "backend timed out"
            );
            ExtractionResult::failed(
                backend.kind(),
                backend.model(),
                format!("timed out after {}ms", timeout.as_millis()),
            )
            .with_elapsed_ms(elapsed_ms)
        }
    }
}
