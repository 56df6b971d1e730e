//! Ollama `/api/chat` backend.

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

/// Configuration for the Ollama backend.
#[derive(Debug, Clone, Builder)]
#[builder(
    name = "OllamaBuilder",
    pattern = "owned",
    setter(into, strip_option, prefix = "with"),
    build_fn(validate = "Self::validate_config")
)]
pub struct OllamaConfig {
    /// Server base URL.
    #[builder(default = "OllamaConfig::DEFAULT_BASE_URL.to_owned()")]
    pub base_url: String,
    /// Vision model.
    #[builder(default = "OllamaConfig::DEFAULT_MODEL.to_owned()")]
    pub model: String,
    /// Request timeout duration; local models can be slow.
    #[builder(default = "Duration::from_secs(120)")]
    pub timeout: Duration,
    /// Connection timeout duration.
    #[builder(default = "Duration::from_secs(10)")]
    pub connect_timeout: Duration,
    /// Optional category reference file.
    #[builder(default)]
    pub categories_path: Option<PathBuf>,
}

impl OllamaConfig {
    /// Default server base URL.
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:11434";
    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llava";

    /// Create a new configuration builder.
    pub fn builder() -> OllamaBuilder {
        OllamaBuilder::default()
    }
}

impl OllamaBuilder {
    fn validate_config(&self) -> std::result::Result<(), String> {
        validate_url("base URL", self.base_url.as_ref())?;
        validate_nonzero("Timeout", self.timeout.as_ref())?;
        validate_nonzero("Connect timeout", self.connect_timeout.as_ref())
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// Receipt extraction through a self-hosted Ollama server.
#[derive(Debug)]
pub struct OllamaBackend {
    http: Client,
    config: OllamaConfig,
    prompt: PromptCache,
}

impl OllamaBackend {
    /// Creates the backend and its HTTP client.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let http = build_client("ollama", config.timeout, config.connect_timeout)?;
        let prompt = PromptCache::new(config.categories_path.clone());
        Ok(Self {
            http,
            config,
            prompt,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Returns the prompt cache of this instance.
    pub fn prompt_cache(&self) -> &PromptCache {
        &self.prompt
    }

    async fn analyze(&self, image: &ReceiptImage) -> Result<ExtractionResult> {
        let prompt = self.prompt.get().await;
        let body = json!({
            "model": self.config.model,
            "stream": false,
            "format": "json",
            "options": { "temperature": 0 },
            "messages": [
                { "role": "system", "content": &*prompt },
                { "role": "user", "content": USER_INSTRUCTION, "images": [encode_image(image)] },
            ],
        });

        let response = self
            .http
            .post(endpoint(&self.config.base_url, "api/chat"))
            .json(&body)
            .send()
            .await?;
        let chat: ChatResponse = check_status(response).await?.json().await?;

        let content = chat
            .message
            .map(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::invalid_response("chat response has no message content"))?;

        parse_model_output(BackendKind::Ollama, &self.config.model, &content)
    }
}

#[async_trait]
impl ExtractionBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn extract(&self, image: &ReceiptImage) -> yorutsuke_core::Result<ExtractionResult> {
        instrumented(BackendKind::Ollama, &self.config.model, image, self.analyze(image)).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn default_config() {
        let config = OllamaConfig::builder().build().unwrap();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "llava");
        assert_eq!(config.timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn sends_base64_image_and_json_format() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .json_body_partial(r#"{"format": "json", "stream": false}"#)
                    .body_contains("\"images\":[\"aW1n\"]");
                then.status(200).json_body(json!({
                    "message": { "role": "assistant", "content": "{\"merchant\":\"Uniqlo\",\"amount\":\"2,990\"}" },
                    "done": true
                }));
            })
            .await;

        let config = OllamaConfig::builder()
            .with_base_url(server.base_url())
            .build()
            .unwrap();
        let image = ReceiptImage::new("img-3", &b"img"[..], "image/jpeg");
        let result = OllamaBackend::new(config).unwrap().extract(&image).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.vendor.as_deref(), Some("Uniqlo"));
        assert_eq!(result.total, Some(2990.0));
    }
}
