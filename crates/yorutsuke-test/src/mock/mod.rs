//! Mock implementations of the core capability traits.
//!
//! These mocks keep all state in memory and record how they were called so
//! tests can assert on chunking, retries and ordering.

mod backend;
mod store;

pub use backend::{MockBackend, MockBehavior};
pub use store::{BatchWriteFault, MemoryStore};
