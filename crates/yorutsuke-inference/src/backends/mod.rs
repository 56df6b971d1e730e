//! Extraction backend adapters.

mod azure;
mod gemini;
mod ollama;
mod openai;

use std::future::Future;

use tokio::time::Instant;
use yorutsuke_core::types::{BackendKind, ExtractionResult, ReceiptImage};

pub use self::azure::{AzureBackend, AzureBuilder, AzureBuilderError, AzureConfig};
pub use self::gemini::{GeminiBackend, GeminiBuilder, GeminiBuilderError, GeminiConfig};
pub use self::ollama::{OllamaBackend, OllamaBuilder, OllamaBuilderError, OllamaConfig};
pub use self::openai::{OpenAiBackend, OpenAiBuilder, OpenAiBuilderError, OpenAiConfig};
use crate::{Result, TRACING_TARGET_BACKEND};

/// User instruction sent next to the image by the LLM backends.
const USER_INSTRUCTION: &str = "Extract the fields of this receipt.";

/// Runs one backend call with timing and logging.
async fn instrumented<F>(
    backend: BackendKind,
    model: &str,
    image: &ReceiptImage,
    call: F,
) -> yorutsuke_core::Result<ExtractionResult>
where
    F: Future<Output = Result<ExtractionResult>>,
{
    let started_at = Instant::now();

    tracing::debug!(
        target: TRACING_TARGET_BACKEND,
        backend = %backend,
        model,
        image_id = %image.image_id,
        size = image.len(),
        "Processing extraction request"
    );

    let result = call.await;
    let elapsed_ms = started_at.elapsed().as_millis() as u64;

    match result {
        Ok(extraction) => {
            tracing::debug!(
                target: TRACING_TARGET_BACKEND,
                backend = %backend,
                image_id = %image.image_id,
                vendor = extraction.vendor.as_deref(),
                total = extraction.total,
                elapsed_ms,
                "Extraction successful"
            );
            Ok(extraction.with_elapsed_ms(elapsed_ms))
        }
        Err(error) => {
            tracing::warn!(
                target: TRACING_TARGET_BACKEND,
                backend = %backend,
                image_id = %image.image_id,
                error = %error,
                retryable = error.is_retryable(),
                elapsed_ms,
                "Extraction failed"
            );
            Err(error.into())
        }
    }
}

/// Checks that a configured base URL is absolute.
fn validate_url(field: &str, value: Option<&String>) -> std::result::Result<(), String> {
    match value {
        Some(url) => url::Url::parse(url)
            .map(|_| ())
            .map_err(|e| format!("Invalid {field} '{url}': {e}")),
        None => Ok(()),
    }
}

/// Checks that a configured duration is not zero.
fn validate_nonzero(field: &str, value: Option<&std::time::Duration>) -> std::result::Result<(), String> {
    match value {
        Some(d) if d.is_zero() => Err(format!("{field} must be greater than 0")),
        _ => Ok(()),
    }
}

/// Joins a path onto a base URL, tolerating a trailing slash on the base.
fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
