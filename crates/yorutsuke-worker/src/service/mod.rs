//! Worker state and configuration.
//!
//! [`WorkerState`] bundles the store capabilities, the object-store client
//! and the backend comparator every pipeline invocation needs. It can be
//! assembled from connected clients with [`WorkerState::new`] or from
//! configuration with [`WorkerState::from_config`].

mod config;
mod state;

pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_LINE_BYTES, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_TOTAL_TOLERANCE,
    PipelineConfig, WorkerConfig,
};
pub use state::WorkerState;
