//! Domain records shared by the ingestion pipelines.

mod batch_job;
mod comparison;
mod extraction;
mod transaction;

pub use batch_job::{BatchCounts, BatchJob, BatchJobStatus};
pub use comparison::{ComparisonResult, ComparisonStatus};
pub use extraction::{BackendKind, ExtractionResult, LineItem, ReceiptImage};
pub use transaction::{
    Category, ImageLocation, Transaction, TransactionOrigin, TransactionStatus, TransactionType,
};
