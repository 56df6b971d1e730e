//! Extraction backend capability.

use async_trait::async_trait;

use crate::Result;
use crate::types::{BackendKind, ExtractionResult, ReceiptImage};

/// A service that turns a receipt image into an [`ExtractionResult`].
///
/// Implementations normalize their provider's response so callers never
/// need to know which backend ran. An `Err` means the invocation itself
/// failed; the comparator records it in that backend's slot.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Returns which backend this is.
    fn kind(&self) -> BackendKind;

    /// Returns the model or deployment identifier.
    fn model(&self) -> &str;

    /// Extracts receipt fields from an image.
    async fn extract(&self, image: &ReceiptImage) -> Result<ExtractionResult>;
}
