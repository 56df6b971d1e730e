//! Transactional store capabilities.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::Result;
use crate::types::{BatchCounts, BatchJob, Transaction};

/// Largest number of items a single batch write may carry.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Outcome of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written.
    Inserted,
    /// A record with the same identifier or image identifier already existed.
    AlreadyExists,
}

impl PutOutcome {
    /// Returns whether the record was written by this call.
    #[inline]
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Outcome of one batch write attempt.
#[derive(Debug, Clone, Default)]
pub struct BatchPutOutput {
    /// Identifiers written by this attempt.
    pub inserted: Vec<String>,
    /// Identifiers that already existed.
    pub duplicates: Vec<String>,
    /// Items the store did not process; the caller may retry them.
    pub unprocessed: Vec<Transaction>,
}

/// Persistence of [`Transaction`] records.
///
/// Every write is conditional: a record is created only when neither its
/// identifier nor its image identifier is present.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts the transaction unless it already exists.
    async fn put_if_absent(&self, transaction: &Transaction) -> Result<PutOutcome>;

    /// Writes up to [`max_batch_size`](Self::max_batch_size) transactions.
    ///
    /// Partial failure is reported through [`BatchPutOutput::unprocessed`],
    /// not as an error.
    async fn batch_put(&self, transactions: Vec<Transaction>) -> Result<BatchPutOutput>;

    /// Returns whether a transaction with this identifier exists.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Returns whether a transaction for this image exists.
    async fn exists_for_image(&self, image_id: &str) -> Result<bool>;

    /// Returns the image key recorded on the transaction of this image.
    async fn image_key_for(&self, image_id: &str) -> Result<Option<String>>;

    /// Returns which of the given image identifiers have a transaction.
    async fn existing_image_ids(&self, image_ids: Vec<String>) -> Result<HashSet<String>>;

    /// Returns the batch write limit of this store.
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_WRITE_ITEMS
    }
}

/// Access to externally created [`BatchJob`] records.
#[async_trait]
pub trait BatchJobStore: Send + Sync {
    /// Finds a job by its correlation id (the job id in result paths).
    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<BatchJob>>;

    /// Marks a job `COMPLETED` with the given counts.
    async fn mark_completed(&self, job_id: &str, counts: BatchCounts) -> Result<()>;
}
