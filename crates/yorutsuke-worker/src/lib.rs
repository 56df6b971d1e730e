#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for event parsing and dispatch.
pub const TRACING_TARGET_EVENT: &str = "yorutsuke_worker::event";

/// Tracing target for the single-image pipeline.
pub const TRACING_TARGET_IMAGE: &str = "yorutsuke_worker::image";

/// Tracing target for the batch pipeline.
pub const TRACING_TARGET_BATCH: &str = "yorutsuke_worker::batch";

/// Tracing target for the reconciliation sweep.
pub const TRACING_TARGET_RECONCILE: &str = "yorutsuke_worker::reconcile";

mod error;
mod retry;

pub mod event;
pub mod pipeline;
pub mod reconcile;
pub mod service;

pub use crate::error::{Result, WorkerError};
pub use crate::retry::RetryConfig;
pub use crate::service::{PipelineConfig, WorkerConfig, WorkerState};
