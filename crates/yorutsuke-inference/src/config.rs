//! Backend selection from flat configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};
use yorutsuke_core::ExtractionBackend;
use yorutsuke_core::types::BackendKind;

use crate::{
    AzureBackend, AzureConfig, Comparator, GeminiBackend, GeminiConfig, OllamaBackend,
    OllamaConfig, OpenAiBackend, OpenAiConfig, Result, TRACING_TARGET_CLIENT,
};

/// Which backends to run and how to reach them.
///
/// A backend is enabled when its credentials (or, for Ollama, its base URL)
/// are present. Enabled backends run in the order openai, gemini, azure,
/// ollama.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct InferenceConfig {
    /// Backend whose result is persisted when it succeeded.
    #[cfg_attr(feature = "config", arg(long = "primary-backend", env = "PRIMARY_BACKEND"))]
    pub primary_backend: Option<BackendKind>,

    /// Per-backend time limit in seconds.
    #[cfg_attr(
        feature = "config",
        arg(long = "backend-timeout-secs", env = "BACKEND_TIMEOUT_SECS", default_value = "90")
    )]
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,

    /// JSON file with the category reference list used in prompts.
    #[cfg_attr(feature = "config", arg(long = "categories-path", env = "CATEGORIES_PATH"))]
    pub categories_path: Option<PathBuf>,

    /// OpenAI API key.
    #[cfg_attr(feature = "config", arg(long = "openai-api-key", env = "OPENAI_API_KEY"))]
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible base URL.
    #[cfg_attr(feature = "config", arg(long = "openai-base-url", env = "OPENAI_BASE_URL"))]
    pub openai_base_url: Option<String>,

    /// OpenAI model.
    #[cfg_attr(feature = "config", arg(long = "openai-model", env = "OPENAI_MODEL"))]
    pub openai_model: Option<String>,

    /// Gemini API key.
    #[cfg_attr(feature = "config", arg(long = "gemini-api-key", env = "GEMINI_API_KEY"))]
    pub gemini_api_key: Option<String>,

    /// Gemini model.
    #[cfg_attr(feature = "config", arg(long = "gemini-model", env = "GEMINI_MODEL"))]
    pub gemini_model: Option<String>,

    /// Azure Document Intelligence endpoint.
    #[cfg_attr(feature = "config", arg(long = "azure-endpoint", env = "AZURE_DI_ENDPOINT"))]
    pub azure_endpoint: Option<String>,

    /// Azure Document Intelligence key.
    #[cfg_attr(feature = "config", arg(long = "azure-api-key", env = "AZURE_DI_KEY"))]
    pub azure_api_key: Option<String>,

    /// Upper bound on Azure polling, in seconds.
    #[cfg_attr(
        feature = "config",
        arg(long = "azure-max-wait-secs", env = "AZURE_DI_MAX_WAIT_SECS", default_value = "60")
    )]
    #[serde(default = "default_azure_max_wait_secs")]
    pub azure_max_wait_secs: u64,

    /// Wait before the first Azure poll, in milliseconds.
    #[cfg_attr(
        feature = "config",
        arg(long = "azure-poll-interval-ms", env = "AZURE_DI_POLL_INTERVAL_MS", default_value = "1000")
    )]
    #[serde(default = "default_azure_poll_interval_ms")]
    pub azure_poll_interval_ms: u64,

    /// Ollama base URL.
    #[cfg_attr(feature = "config", arg(long = "ollama-base-url", env = "OLLAMA_BASE_URL"))]
    pub ollama_base_url: Option<String>,

    /// Ollama model.
    #[cfg_attr(feature = "config", arg(long = "ollama-model", env = "OLLAMA_MODEL"))]
    pub ollama_model: Option<String>,
}

fn default_backend_timeout_secs() -> u64 {
    90
}

fn default_azure_max_wait_secs() -> u64 {
    60
}

fn default_azure_poll_interval_ms() -> u64 {
    1000
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            primary_backend: None,
            backend_timeout_secs: default_backend_timeout_secs(),
            categories_path: None,
            openai_api_key: None,
            openai_base_url: None,
            openai_model: None,
            gemini_api_key: None,
            gemini_model: None,
            azure_endpoint: None,
            azure_api_key: None,
            azure_max_wait_secs: default_azure_max_wait_secs(),
            azure_poll_interval_ms: default_azure_poll_interval_ms(),
            ollama_base_url: None,
            ollama_model: None,
        }
    }
}

impl InferenceConfig {
    /// Returns the per-backend time limit.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// Builds every enabled backend.
    pub fn build_backends(&self) -> Result<Vec<Arc<dyn ExtractionBackend>>> {
        let mut backends: Vec<Arc<dyn ExtractionBackend>> = Vec::new();

        if let Some(api_key) = &self.openai_api_key {
            let mut builder = OpenAiConfig::builder().with_api_key(api_key.clone());
            if let Some(base_url) = &self.openai_base_url {
                builder = builder.with_base_url(base_url.clone());
            }
            if let Some(model) = &self.openai_model {
                builder = builder.with_model(model.clone());
            }
            if let Some(path) = &self.categories_path {
                builder = builder.with_categories_path(path.clone());
            }
            backends.push(Arc::new(OpenAiBackend::new(builder.build()?)?));
        }

        if let Some(api_key) = &self.gemini_api_key {
            let mut builder = GeminiConfig::builder().with_api_key(api_key.clone());
            if let Some(model) = &self.gemini_model {
                builder = builder.with_model(model.clone());
            }
            if let Some(path) = &self.categories_path {
                builder = builder.with_categories_path(path.clone());
            }
            backends.push(Arc::new(GeminiBackend::new(builder.build()?)?));
        }

        if let (Some(endpoint), Some(api_key)) = (&self.azure_endpoint, &self.azure_api_key) {
            let config = AzureConfig::builder()
                .with_endpoint(endpoint.clone())
                .with_api_key(api_key.clone())
                .with_max_wait(Duration::from_secs(self.azure_max_wait_secs))
                .with_poll_interval(Duration::from_millis(self.azure_poll_interval_ms))
                .build()?;
            backends.push(Arc::new(AzureBackend::new(config)?));
        }

        if let Some(base_url) = &self.ollama_base_url {
            let mut builder = OllamaConfig::builder().with_base_url(base_url.clone());
            if let Some(model) = &self.ollama_model {
                builder = builder.with_model(model.clone());
            }
            if let Some(path) = &self.categories_path {
                builder = builder.with_categories_path(path.clone());
            }
            backends.push(Arc::new(OllamaBackend::new(builder.build()?)?));
        }

        tracing::info!(
            target: TRACING_TARGET_CLIENT,
            backends = ?backends.iter().map(|b| b.kind().as_str()).collect::<Vec<_>>(),
            primary = ?self.primary_backend,
            "extraction backends configured"
        );

        Ok(backends)
    }

    /// Builds a comparator over every enabled backend.
    pub fn build_comparator(&self) -> Result<Comparator> {
        Ok(Comparator::new(self.build_backends()?).with_timeout(self.backend_timeout()))
    }
}
