//! OpenAI-compatible chat completions backend.

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
use crate::http::{build_client, check_status, data_uri};
use crate::prompt::PromptCache;
use crate::receipt::parse_model_output;
use crate::{Error, Result};

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone, Builder)]
#[builder(
    name = "OpenAiBuilder",
    pattern = "owned",
    setter(into, strip_option, prefix = "with"),
    build_fn(validate = "Self::validate_config")
)]
pub struct OpenAiConfig {
    /// API base URL, including the version segment.
    #[builder(default = "OpenAiConfig::DEFAULT_BASE_URL.to_owned()")]
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Vision-capable chat model.
    #[builder(default = "OpenAiConfig::DEFAULT_MODEL.to_owned()")]
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

impl OpenAiConfig {
    /// Default API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Create a new configuration builder.
    pub fn builder() -> OpenAiBuilder {
        OpenAiBuilder::default()
    }
}

impl OpenAiBuilder {
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
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Receipt extraction through `POST {base_url}/chat/completions`.
#[derive(Debug)]
pub struct OpenAiBackend {
    http: Client,
    config: OpenAiConfig,
    prompt: PromptCache,
}

impl OpenAiBackend {
    /// Creates the backend and its HTTP client.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let http = build_client("openai", config.timeout, config.connect_timeout)?;
        let prompt = PromptCache::new(config.categories_path.clone());
        Ok(Self {
            http,
            config,
            prompt,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OpenAiConfig {
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
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": &*prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": USER_INSTRUCTION },
                        { "type": "image_url", "image_url": { "url": data_uri(image) } },
                    ],
                },
            ],
        });

        let response = self
            .http
            .post(endpoint(&self.config.base_url, "chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let completion: ChatCompletion = check_status(response).await?.json().await?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::invalid_response("completion has no message content"))?;

        parse_model_output(BackendKind::OpenAi, &self.config.model, &content)
    }
}

#[async_trait]
impl ExtractionBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn extract(&self, image: &ReceiptImage) -> yorutsuke_core::Result<ExtractionResult> {
        instrumented(BackendKind::OpenAi, &self.config.model, image, self.analyze(image)).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn backend(base_url: String) -> OpenAiBackend {
        let config = OpenAiConfig::builder()
            .with_base_url(base_url)
            .with_api_key("sk-test")
            .build()
            .unwrap();
        OpenAiBackend::new(config).unwrap()
    }

    #[test]
    fn builder_requires_api_key() {
        assert!(OpenAiConfig::builder().build().is_err());
        assert!(OpenAiConfig::builder().with_api_key(" ").build().is_err());
        assert!(
            OpenAiConfig::builder()
                .with_api_key("k")
                .with_base_url("not a url")
                .build()
                .is_err()
        );
    }

    #[tokio::test]
    async fn extracts_fenced_json_answer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "choices": [{
                        "message": {
                            "content": "```json\n{\"vendor\":\"Lawson\",\"total\":1280,\"date\":\"2025-01-15\",\"category\":\"food\",\"type\":\"expense\"}\n```"
                        }
                    }]
                }));
            })
            .await;

        let backend = backend(server.url("/v1"));
        let image = ReceiptImage::new("img-1", &b"jpeg"[..], "image/jpeg");
        let result = backend.extract(&image).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.backend, BackendKind::OpenAi);
        assert_eq!(result.vendor.as_deref(), Some("Lawson"));
        assert_eq!(result.total, Some(1280.0));
        assert!(backend.prompt_cache().is_loaded().await);
    }

    #[tokio::test]
    async fn api_error_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let image = ReceiptImage::new("img-1", &b"jpeg"[..], "image/jpeg");
        let err = backend(server.url("/v1")).extract(&image).await.unwrap_err();
        assert_eq!(err.kind(), yorutsuke_core::ErrorKind::ServiceUnavailable);
    }
}
