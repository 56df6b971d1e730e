//! Database row models and their mapping to the domain types.

mod batch_job;
mod transaction;

pub use batch_job::{BatchJobRow, NewBatchJob, UpdateBatchJob};
pub use transaction::{NewTransaction, TransactionRow};
