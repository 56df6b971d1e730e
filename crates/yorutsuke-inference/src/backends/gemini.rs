//! Gemini `generateContent` backend.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use derive_builder::Builder;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use yorutsuke_core::ExtractionBackend;
use yorutsuke_core::types::{BackendKind, ExtractionResult, ReceiptImage};

use super::{USER_INSTRUCTION, endpoint, instrumented, validate_nonzero, validate_url};
use crate::http::{build_client, check_status, encode_image};
use crate::prompt::PromptCache;
use crate::receipt::parse_model_output;
use crate::{Error, Result};

/// Configuration for the Gemini backend.
#[derive(Debug, Clone, Builder)]
#[builder(
    name = "GeminiBuilder",
    pattern = "owned",
    setter(into, strip_option, prefix = "with"),
    build_fn(validate = "Self::validate_config")
)]
pub struct GeminiConfig {
    /// API base URL.
    #[builder(default = "GeminiConfig::DEFAULT_BASE_URL.to_owned()")]
    pub base_url: String,
    /// API key sent as `x-goog-api-key`.
    pub api_key: String,
    /// Multimodal model.
    #[builder(default = "GeminiConfig::DEFAULT_MODEL.to_owned()")]
    pub model: String,
    /// Request timeout duration.
    #[builder(default = "Duration::from_secs(60)")]
    pub timeout: Duration,
    /// Connection timeout duration.
    #[builder(default = "Duration::from_secs(10)")]
    pub connect_timeout: Duration,
    /// Optional category reference file.
    #[builder(default)]
    pub categories_path: Option<PathBuf>,
}

impl GeminiConfig {
    /// Default API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";
    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";

    /// Create a new configuration builder.
    pub fn builder() -> GeminiBuilder {
        GeminiBuilder::default()
    }
}

impl GeminiBuilder {
    fn validate_config(&self) -> std::result::Result<(), String> {
        if self.api_key.as_ref().is_some_and(|k| k.trim().is_empty()) {
            return Err("API key must not be empty".to_string());
        }
        validate_url("base URL", self.base_url.as_ref())?;
        validate_nonzero("Timeout", self.timeout.as_ref())?;
        validate_nonzero("Connect timeout", self.connect_timeout.as_ref())
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Receipt extraction through `models/{model}:generateContent`.
#[derive(Debug)]
pub struct GeminiBackend {
    http: Client,
    config: GeminiConfig,
    prompt: PromptCache,
}

impl GeminiBackend {
    /// Creates the backend and its HTTP client.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = build_client("gemini", config.timeout, config.connect_timeout)?;
        let prompt = PromptCache::new(config.categories_path.clone());
        Ok(Self {
            http,
            config,
            prompt,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Returns the prompt cache of this instance.
    pub fn prompt_cache(&self) -> &PromptCache {
        &self.prompt
    }

    async fn analyze(&self, image: &ReceiptImage) -> Result<ExtractionResult> {
        let prompt = self.prompt.get().await;
        let body = json!({
            "systemInstruction": { "parts": [{ "text": &*prompt }] },
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": USER_INSTRUCTION },
                    { "inlineData": { "mimeType": image.content_type, "data": encode_image(image) } },
                ],
            }],
            "generationConfig": {
                "temperature": 0,
                "responseMimeType": "application/json",
            },
        });

        let path = format!("models/{}:generateContent", self.config.model);
        let response = self
            .http
            .post(endpoint(&self.config.base_url, &path))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let generated: GenerateContentResponse = check_status(response).await?.json().await?;

        let candidate = generated
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_response("response has no candidates"))?;

        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_owned());
            return Err(Error::invalid_response(format!(
                "candidate has no text (finish reason: {reason})"
            )));
        }

        parse_model_output(BackendKind::Gemini, &self.config.model, &text)
    }
}

#[async_trait]
impl ExtractionBackend for GeminiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn extract(&self, image: &ReceiptImage) -> yorutsuke_core::Result<ExtractionResult> {
        instrumented(BackendKind::Gemini, &self.config.model, image, self.analyze(image)).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn backend(base_url: String) -> GeminiBackend {
        let config = GeminiConfig::builder()
            .with_base_url(base_url)
            .with_api_key("g-key")
            .build()
            .unwrap();
        GeminiBackend::new(config).unwrap()
    }

    #[tokio::test]
    async fn joins_candidate_parts() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash:generateContent")
                    .header("x-goog-api-key", "g-key");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": { "parts": [
                            { "text": "{\"vendor\":\"FamilyMart\"," },
                            { "text": "\"total\":\"450\",\"currency\":\"JPY\"}" }
                        ]},
                        "finishReason": "STOP"
                    }]
                }));
            })
            .await;

        let image = ReceiptImage::new("img-2", &b"png"[..], "image/png");
        let result = backend(server.url("/v1beta")).extract(&image).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.vendor.as_deref(), Some("FamilyMart"));
        assert_eq!(result.total, Some(450.0));
        assert_eq!(result.currency.as_deref(), Some("JPY"));
    }

    #[tokio::test]
    async fn empty_candidate_is_invalid_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(200)
                    .json_body(json!({ "candidates": [{ "finishReason": "SAFETY" }] }));
            })
            .await;

        let image = ReceiptImage::new("img-2", &b"png"[..], "image/png");
        let err = backend(server.base_url()).extract(&image).await.unwrap_err();
        assert_eq!(err.kind(), yorutsuke_core::ErrorKind::Serialization);
        assert!(err.to_string().contains("SAFETY"));
    }
}
