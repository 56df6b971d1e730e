//! Shared HTTP plumbing for the backends.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, ClientBuilder, Response};
use yorutsuke_core::types::ReceiptImage;

use crate::{Error, Result, TRACING_TARGET_CLIENT};

/// Longest error body kept in an [`Error::ApiError`] message.
const MAX_ERROR_BODY: usize = 512;

/// Builds the HTTP client used by one backend.
pub(crate) fn build_client(
    backend: &'static str,
    timeout: Duration,
    connect_timeout: Duration,
) -> Result<Client> {
    tracing::debug!(
        target: TRACING_TARGET_CLIENT,
        backend,
        timeout_ms = timeout.as_millis() as u64,
        "creating backend HTTP client"
    );

    ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .user_agent(concat!("yorutsuke-inference/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(Error::Http)
}

/// Turns a non-success response into an [`Error::ApiError`].
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }

    Err(Error::api_error(status.as_u16(), message))
}

/// Encodes the image as standard base64.
pub(crate) fn encode_image(image: &ReceiptImage) -> String {
    STANDARD.encode(&image.bytes)
}

/// Encodes the image as a `data:` URI.
pub(crate) fn data_uri(image: &ReceiptImage) -> String {
    format!("data:{};base64,{}", image.content_type, encode_image(image))
}
