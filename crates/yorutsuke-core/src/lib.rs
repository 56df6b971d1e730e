#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for schema validation.
pub const TRACING_TARGET_AIRLOCK: &str = "yorutsuke_core::airlock";

/// Tracing target for idempotency key derivation.
pub const TRACING_TARGET_IDENTITY: &str = "yorutsuke_core::identity";

mod backend;
mod error;
mod store;

pub mod airlock;
pub mod identity;
pub mod types;

pub use backend::ExtractionBackend;
pub use error::{BoxedError, Error, ErrorKind, Result};
pub use store::{
    BatchJobStore, BatchPutOutput, MAX_BATCH_WRITE_ITEMS, PutOutcome, TransactionStore,
};
