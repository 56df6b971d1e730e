#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for HTTP client setup and configuration.
pub const TRACING_TARGET_CLIENT: &str = "yorutsuke_inference::client";

/// Tracing target for individual backend invocations.
pub const TRACING_TARGET_BACKEND: &str = "yorutsuke_inference::backend";

/// Tracing target for multi-backend comparisons.
pub const TRACING_TARGET_COMPARATOR: &str = "yorutsuke_inference::comparator";

mod backends;
mod comparator;
mod config;
mod error;
mod http;
pub mod prompt;
mod receipt;

pub use crate::backends::{
    AzureBackend, AzureBuilder, AzureConfig, GeminiBackend, GeminiBuilder, GeminiConfig,
    OllamaBackend, OllamaBuilder, OllamaConfig, OpenAiBackend, OpenAiBuilder, OpenAiConfig,
};
pub use crate::comparator::{Comparator, DEFAULT_BACKEND_TIMEOUT};
pub use crate::config::InferenceConfig;
pub use crate::error::{Error, Result};
