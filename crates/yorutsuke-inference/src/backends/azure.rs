//! Azure Document Intelligence backend (prebuilt receipt model).
//!
//! Analysis is asynchronous: the image is submitted, the service answers
//! `202 Accepted` with an `Operation-Location` URL, and that URL is polled
//! until the operation reaches a terminal state. The wait between polls
//! grows linearly and the total wait is bounded.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use derive_builder::Builder;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tokio::time::Instant;
use yorutsuke_core::ExtractionBackend;
use yorutsuke_core::types::{BackendKind, ExtractionResult, LineItem, ReceiptImage};

use super::{endpoint, instrumented, validate_nonzero, validate_url};
use crate::http::{build_client, check_status};
use crate::{Error, Result, TRACING_TARGET_BACKEND};

/// Header carrying the subscription key.
const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Header carrying the operation URL of a submitted analysis.
const OPERATION_LOCATION: &str = "Operation-Location";

/// Configuration for the Azure Document Intelligence backend.
#[derive(Debug, Clone, Builder)]
#[builder(
    name = "AzureBuilder",
    pattern = "owned",
    setter(into, strip_option, prefix = "with"),
    build_fn(validate = "Self::validate_config")
)]
pub struct AzureConfig {
    /// Resource endpoint, e.g. `https://{resource}.cognitiveservices.azure.com`.
    pub endpoint: String,
    /// Subscription key.
    pub api_key: String,
    /// Analysis model.
    #[builder(default = "AzureConfig::DEFAULT_MODEL.to_owned()")]
    pub model: String,
    /// REST API version.
    #[builder(default = "AzureConfig::DEFAULT_API_VERSION.to_owned()")]
    pub api_version: String,
    /// Wait before the first poll.
    #[builder(default = "Duration::from_secs(1)")]
    pub poll_interval: Duration,
    /// Added to the wait after every poll; zero polls at a fixed interval.
    #[builder(default = "Duration::from_millis(500)")]
    pub poll_increment: Duration,
    /// Upper bound on the total time spent polling.
    #[builder(default = "Duration::from_secs(60)")]
    pub max_wait: Duration,
    /// Per-request timeout duration.
    #[builder(default = "Duration::from_secs(30)")]
    pub timeout: Duration,
    /// Connection timeout duration.
    #[builder(default = "Duration::from_secs(10)")]
    pub connect_timeout: Duration,
}

impl AzureConfig {
    /// Default analysis model.
    pub const DEFAULT_MODEL: &'static str = "prebuilt-receipt";
    /// Default REST API version.
    pub const DEFAULT_API_VERSION: &'static str = "2024-11-30";

    /// Create a new configuration builder.
    pub fn builder() -> AzureBuilder {
        AzureBuilder::default()
    }

    /// Returns the wait before poll number `attempt` (zero based).
    pub fn poll_delay(&self, attempt: u32) -> Duration {
        self.poll_interval
            .saturating_add(self.poll_increment.saturating_mul(attempt))
    }
}

impl AzureBuilder {
    fn validate_config(&self) -> std::result::Result<(), String> {
        if self.api_key.as_ref().is_some_and(|k| k.trim().is_empty()) {
            return Err("API key must not be empty".to_string());
        }
        validate_url("endpoint", self.endpoint.as_ref())?;
        validate_nonzero("Poll interval", self.poll_interval.as_ref())?;
        validate_nonzero("Max wait", self.max_wait.as_ref())?;
        validate_nonzero("Timeout", self.timeout.as_ref())?;
        validate_nonzero("Connect timeout", self.connect_timeout.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: OperationStatus,
    analyze_result: Option<AnalyzeResult>,
    error: Option<OperationError>,
}

#[derive(Deserialize)]
struct OperationError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    documents: Vec<AnalyzedDocument>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzedDocument {
    doc_type: Option<String>,
    #[serde(default)]
    fields: HashMap<String, DocumentField>,
    confidence: Option<f64>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentField {
    value_string: Option<String>,
    value_number: Option<f64>,
    value_date: Option<String>,
    value_currency: Option<CurrencyValue>,
    value_array: Option<Vec<DocumentField>>,
    value_object: Option<HashMap<String, DocumentField>>,
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyValue {
    amount: Option<f64>,
    currency_code: Option<String>,
}

impl DocumentField {
    fn text(&self) -> Option<String> {
        self.value_string
            .clone()
            .or_else(|| self.content.clone())
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }

    fn amount(&self) -> Option<f64> {
        self.value_currency
            .as_ref()
            .and_then(|c| c.amount)
            .or(self.value_number)
    }
}

/// Receipt extraction through Azure Document Intelligence.
#[derive(Debug)]
pub struct AzureBackend {
    http: Client,
    config: AzureConfig,
}

impl AzureBackend {
    /// Creates the backend and its HTTP client.
    pub fn new(config: AzureConfig) -> Result<Self> {
        let http = build_client("azure", config.timeout, config.connect_timeout)?;
        Ok(Self { http, config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AzureConfig {
        &self.config
    }

    async fn analyze(&self, image: &ReceiptImage) -> Result<ExtractionResult> {
        let operation_url = self.submit(image).await?;
        let document = self.poll(&image.image_id, &operation_url).await?;
        Ok(self.normalize(document))
    }

    async fn submit(&self, image: &ReceiptImage) -> Result<String> {
        let path = format!(
            "documentintelligence/documentModels/{}:analyze",
            self.config.model
        );
        let response = self
            .http
            .post(endpoint(&self.config.endpoint, &path))
            .query(&[("api-version", self.config.api_version.as_str())])
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(CONTENT_TYPE, &image.content_type)
            .body(image.bytes.clone())
            .send()
            .await?;
        let response = check_status(response).await?;

        let location = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::invalid_response("submit response has no Operation-Location"))?;

        url::Url::parse(location)?;
        Ok(location.to_owned())
    }

    async fn poll(&self, image_id: &str, operation_url: &str) -> Result<AnalyzedDocument> {
        let deadline = Instant::now() + self.config.max_wait;
        let mut attempt = 0_u32;

        loop {
            let delay = self.config.poll_delay(attempt);
            if Instant::now() + delay > deadline {
                return Err(Error::timeout(self.config.max_wait));
            }
            tokio::time::sleep(delay).await;
            attempt += 1;

            let response = self
                .http
                .get(operation_url)
                .header(API_KEY_HEADER, &self.config.api_key)
                .send()
                .await?;
            let operation: AnalyzeOperation = check_status(response).await?.json().await?;

            tracing::trace!(
                target: TRACING_TARGET_BACKEND,
                image_id,
                attempt,
                status = ?operation.status,
                "polled analysis operation"
            );

            match operation.status {
                OperationStatus::NotStarted | OperationStatus::Running => continue,
                OperationStatus::Succeeded => {
                    return operation
                        .analyze_result
                        .and_then(|result| result.documents.into_iter().next())
                        .ok_or_else(|| Error::invalid_response("analysis found no receipt"));
                }
                OperationStatus::Failed | OperationStatus::Canceled | OperationStatus::Unknown => {
                    let reason = operation
                        .error
                        .map(|e| {
                            format!(
                                "{}: {}",
                                e.code.unwrap_or_default(),
                                e.message.unwrap_or_default()
                            )
                        })
                        .unwrap_or_else(|| format!("operation ended as {:?}", operation.status));
                    return Err(Error::analysis_failed(reason));
                }
            }
        }
    }

    fn normalize(&self, document: AnalyzedDocument) -> ExtractionResult {
        let field = |name: &str| document.fields.get(name);

        let mut result = ExtractionResult::new(BackendKind::Azure, &self.config.model);
        result.vendor = field("MerchantName").and_then(DocumentField::text);
        result.total = field("Total").and_then(DocumentField::amount);
        result.tax = field("TotalTax").and_then(DocumentField::amount);
        result.subtotal = field("Subtotal").and_then(DocumentField::amount);
        result.currency = field("Total")
            .and_then(|f| f.value_currency.as_ref())
            .and_then(|c| c.currency_code.clone());
        result.date = field("TransactionDate")
            .and_then(|f| f.value_date.clone().or_else(|| f.text()));
        result.confidence = document.confidence;
        // The receipt model only reports spending.
        result.transaction_type = Some("expense".to_owned());
        result.category = document.doc_type.as_deref().and_then(category_of).map(str::to_owned);
        result.line_items = field("Items")
            .and_then(|f| f.value_array.as_ref())
            .map(|items| items.iter().filter_map(line_item).collect())
            .unwrap_or_default();
        result.description = result.vendor.clone();

        result
    }
}

/// Maps a receipt subtype onto the category taxonomy.
fn category_of(doc_type: &str) -> Option<&'static str> {
    match doc_type.strip_prefix("receipt.")? {
        "retailMeal" | "meal" => Some("food"),
        "gas" | "parking" => Some("transport"),
        "hotel" => Some("travel"),
        _ => None,
    }
}

fn line_item(item: &DocumentField) -> Option<LineItem> {
    let fields = item.value_object.as_ref()?;
    Some(LineItem {
        description: fields.get("Description").and_then(DocumentField::text)?,
        quantity: fields.get("Quantity").and_then(|f| f.value_number),
        unit_price: fields.get("Price").and_then(DocumentField::amount),
        amount: fields.get("TotalPrice").and_then(DocumentField::amount),
    })
}

#[async_trait]
impl ExtractionBackend for AzureBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Azure
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn extract(&self, image: &ReceiptImage) -> yorutsuke_core::Result<ExtractionResult> {
        instrumented(BackendKind::Azure, &self.config.model, image, self.analyze(image)).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn backend(server: &MockServer, max_wait: Duration) -> AzureBackend {
        let config = AzureConfig::builder()
            .with_endpoint(server.base_url())
            .with_api_key("az-key")
            .with_poll_interval(Duration::from_millis(10))
            .with_poll_increment(Duration::from_millis(10))
            .with_max_wait(max_wait)
            .build()
            .unwrap();
        AzureBackend::new(config).unwrap()
    }

    async fn mock_submit(server: &MockServer) -> httpmock::Mock<'_> {
        let location = server.url("/operations/op-1");
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/documentintelligence/documentModels/prebuilt-receipt:analyze")
                    .query_param("api-version", AzureConfig::DEFAULT_API_VERSION)
                    .header("Ocp-Apim-Subscription-Key", "az-key");
                then.status(202).header("Operation-Location", location);
            })
            .await
    }

    #[test]
    fn poll_delay_grows_linearly() {
        let config = AzureConfig::builder()
            .with_endpoint("https://example.cognitiveservices.azure.com")
            .with_api_key("k")
            .build()
            .unwrap();
        assert_eq!(config.poll_delay(0), Duration::from_millis(1000));
        assert_eq!(config.poll_delay(2), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn submit_then_poll_until_succeeded() {
        let server = MockServer::start_async().await;
        let submit = mock_submit(&server).await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/operations/op-1");
                then.status(200).json_body(json!({
                    "status": "succeeded",
                    "analyzeResult": { "documents": [{
                        "docType": "receipt.retailMeal",
                        "confidence": 0.93,
                        "fields": {
                            "MerchantName": { "valueString": "Yoshinoya" },
                            "Total": { "valueCurrency": { "amount": 780.0, "currencyCode": "JPY" } },
                            "TransactionDate": { "valueDate": "2025-02-03" },
                            "Items": { "valueArray": [
                                { "valueObject": {
                                    "Description": { "valueString": "gyudon" },
                                    "TotalPrice": { "valueCurrency": { "amount": 780.0 } }
                                } }
                            ] }
                        }
                    }] }
                }));
            })
            .await;

        let image = ReceiptImage::new("img-4", &b"jpeg"[..], "image/jpeg");
        let result = backend(&server, Duration::from_secs(5))
            .extract(&image)
            .await
            .unwrap();

        submit.assert_async().await;
        poll.assert_async().await;
        assert_eq!(result.vendor.as_deref(), Some("Yoshinoya"));
        assert_eq!(result.total, Some(780.0));
        assert_eq!(result.currency.as_deref(), Some("JPY"));
        assert_eq!(result.date.as_deref(), Some("2025-02-03"));
        assert_eq!(result.category.as_deref(), Some("food"));
        assert_eq!(result.line_items.len(), 1);
    }

    #[tokio::test]
    async fn exceeding_max_wait_is_timeout() {
        let server = MockServer::start_async().await;
        mock_submit(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/operations/op-1");
                then.status(200).json_body(json!({ "status": "running" }));
            })
            .await;

        let image = ReceiptImage::new("img-5", &b"jpeg"[..], "image/jpeg");
        let err = backend(&server, Duration::from_millis(100))
            .extract(&image)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), yorutsuke_core::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn failed_operation_is_analysis_failure() {
        let server = MockServer::start_async().await;
        mock_submit(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/operations/op-1");
                then.status(200).json_body(json!({
                    "status": "failed",
                    "error": { "code": "InvalidImage", "message": "unsupported format" }
                }));
            })
            .await;

        let image = ReceiptImage::new("img-6", &b"gif"[..], "image/gif");
        let err = backend(&server, Duration::from_secs(5))
            .extract(&image)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), yorutsuke_core::ErrorKind::ExternalError);
        assert!(err.to_string().contains("InvalidImage"));
    }
}
