//! Per-backend extraction output.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Identifies one of the receipt extraction backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString, EnumIter, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions with vision input.
    #[strum(serialize = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Gemini `generateContent`.
    Gemini,
    /// Azure Document Intelligence prebuilt receipt model (submit-then-poll).
    Azure,
    /// Self-hosted Ollama vision model.
    Ollama,
}

impl BackendKind {
    /// Returns the stable lowercase name of this backend.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// A receipt image handed to the extraction backends.
#[derive(Debug, Clone)]
pub struct ReceiptImage {
    /// Image identifier (file stem of the uploaded object).
    pub image_id: String,
    /// Raw image bytes.
    pub bytes: Bytes,
    /// MIME type of the image.
    pub content_type: String,
}

impl ReceiptImage {
    /// Creates a new receipt image.
    pub fn new(
        image_id: impl Into<String>,
        bytes: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    /// Returns the image size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns whether the image has no content.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A single line on a receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Item description as printed.
    pub description: String,
    /// Quantity, when printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    /// Unit price, when printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    /// Line total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

/// Normalized output of one backend invocation.
///
/// Every adapter produces exactly this shape, so that comparison and
/// validation never need to know which backend ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    /// Backend that produced this result.
    pub backend: BackendKind,
    /// Model or deployment identifier used by the backend.
    pub model: String,
    /// Whether the backend produced a usable extraction.
    pub success: bool,
    /// Merchant name.
    pub vendor: Option<String>,
    /// Receipt total.
    pub total: Option<f64>,
    /// Tax amount.
    pub tax: Option<f64>,
    /// Subtotal before tax.
    pub subtotal: Option<f64>,
    /// ISO currency code.
    pub currency: Option<String>,
    /// Receipt date as printed or normalized by the backend.
    pub date: Option<String>,
    /// Individual lines.
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Backend-reported confidence in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Category hint.
    pub category: Option<String>,
    /// Income/expense hint.
    pub transaction_type: Option<String>,
    /// Free-text description hint.
    pub description: Option<String>,
    /// Error detail when `success` is false.
    pub error: Option<String>,
    /// Wall time spent in the backend.
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ExtractionResult {
    /// Creates an empty successful result to be filled in by an adapter.
    pub fn new(backend: BackendKind, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            success: true,
            vendor: None,
            total: None,
            tax: None,
            subtotal: None,
            currency: None,
            date: None,
            line_items: Vec::new(),
            confidence: None,
            category: None,
            transaction_type: None,
            description: None,
            error: None,
            elapsed_ms: 0,
        }
    }

    /// Creates a failed result carrying the error detail.
    pub fn failed(backend: BackendKind, model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new(backend, model)
        }
    }

    /// Sets the elapsed time.
    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    /// Returns the `backend:model` label persisted with a transaction.
    pub fn producer(&self) -> String {
        format!("{}:{}", self.backend, self.model)
    }

    /// Builds the untrusted payload handed to the Airlock.
    ///
    /// Only the fields the Airlock knows about are emitted; absent values
    /// are omitted so that required-field checks fire.
    pub fn to_candidate(&self) -> Value {
        let mut map = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                map.insert(key.to_owned(), value);
            }
        };

        put("amount", self.total.map(Value::from));
        put("type", self.transaction_type.clone().map(Value::from));
        put("date", self.date.clone().map(Value::from));
        put("merchant", self.vendor.clone().map(Value::from));
        put("category", self.category.clone().map(Value::from));
        put("description", self.description.clone().map(Value::from));

        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        assert_eq!(BackendKind::OpenAi.to_string(), "openai");
        assert_eq!("azure".parse::<BackendKind>().unwrap(), BackendKind::Azure);
        assert!("textract".parse::<BackendKind>().is_err());
    }

    #[test]
    fn candidate_omits_missing_fields() {
        let mut result = ExtractionResult::new(BackendKind::Gemini, "gemini-2.0-flash");
        result.total = Some(1280.0);
        result.vendor = Some("Lawson".into());

        let candidate = result.to_candidate();
        assert_eq!(candidate["amount"], 1280.0);
        assert_eq!(candidate["merchant"], "Lawson");
        assert!(candidate.get("category").is_none());
    }

    #[test]
    fn failed_result_carries_error() {
        let result = ExtractionResult::failed(BackendKind::Ollama, "llava", "connection refused");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert_eq!(result.producer(), "ollama:llava");
    }
}
