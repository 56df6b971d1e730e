//! In-memory transactional store.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use yorutsuke_core::types::{BatchCounts, BatchJob, BatchJobStatus, Transaction};
use yorutsuke_core::{
    BatchJobStore, BatchPutOutput, Error, MAX_BATCH_WRITE_ITEMS, PutOutcome, Result,
    TransactionStore,
};

/// A fault applied to one [`TransactionStore::batch_put`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchWriteFault {
    /// The last `n` items of the call are reported as unprocessed.
    Unprocessed(usize),
    /// The call fails with a transient error.
    Error,
}

#[derive(Debug, Default)]
struct State {
    transactions: BTreeMap<String, Transaction>,
    images: HashMap<String, String>,
    jobs: BTreeMap<String, BatchJob>,
    batch_faults: VecDeque<BatchWriteFault>,
    put_failures: usize,
    fail_job_updates: bool,
    batch_calls: Vec<(Instant, usize)>,
}

impl State {
    fn insert(&mut self, transaction: Transaction) -> PutOutcome {
        if self.transactions.contains_key(&transaction.id)
            || self.images.contains_key(&transaction.image_id)
        {
            return PutOutcome::AlreadyExists;
        }

        self.images
            .insert(transaction.image_id.clone(), transaction.id.clone());
        self.transactions.insert(transaction.id.clone(), transaction);
        PutOutcome::Inserted
    }
}

/// [`TransactionStore`] and [`BatchJobStore`] kept in memory.
///
/// Enforces the same uniqueness as the database: one record per identifier
/// and one per image identifier.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    max_batch_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_batch_size: MAX_BATCH_WRITE_ITEMS,
        }
    }

    /// Overrides the batch write limit.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a fault for the next batch write that has none.
    pub fn inject_batch_fault(&self, fault: BatchWriteFault) {
        self.state().batch_faults.push_back(fault);
    }

    /// Makes the next `n` conditional puts fail transiently.
    pub fn fail_next_puts(&self, n: usize) {
        self.state().put_failures = n;
    }

    /// Makes every job status update fail.
    pub fn fail_job_updates(&self, fail: bool) {
        self.state().fail_job_updates = fail;
    }

    /// Seeds a transaction, bypassing fault injection.
    pub fn seed(&self, transaction: Transaction) -> PutOutcome {
        self.state().insert(transaction)
    }

    /// Seeds a batch job.
    pub fn insert_job(&self, job: BatchJob) {
        self.state().jobs.insert(job.id.clone(), job);
    }

    /// Returns a batch job by id.
    pub fn job(&self, id: &str) -> Option<BatchJob> {
        self.state().jobs.get(id).cloned()
    }

    /// Returns all transactions ordered by id.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.values().cloned().collect()
    }

    /// Returns a transaction by id.
    pub fn transaction(&self, id: &str) -> Option<Transaction> {
        self.state().transactions.get(id).cloned()
    }

    /// Returns the transaction of an image.
    pub fn transaction_for_image(&self, image_id: &str) -> Option<Transaction> {
        let state = self.state();
        let id = state.images.get(image_id)?;
        state.transactions.get(id).cloned()
    }

    /// Returns the number of stored transactions.
    pub fn len(&self) -> usize {
        self.state().transactions.len()
    }

    /// Returns whether no transaction is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the size of every batch write call, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state().batch_calls.iter().map(|(_, n)| *n).collect()
    }

    /// Returns when every batch write call happened, in call order.
    pub fn batch_call_times(&self) -> Vec<Instant> {
        self.state().batch_calls.iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn put_if_absent(&self, transaction: &Transaction) -> Result<PutOutcome> {
        let mut state = self.state();
        if state.put_failures > 0 {
            state.put_failures -= 1;
            return Err(Error::network_error().with_message("injected put failure"));
        }
        Ok(state.insert(transaction.clone()))
    }

    async fn batch_put(&self, transactions: Vec<Transaction>) -> Result<BatchPutOutput> {
        if transactions.len() > self.max_batch_size {
            return Err(Error::invalid_input().with_message(format!(
                "batch of {} exceeds limit of {}",
                transactions.len(),
                self.max_batch_size
            )));
        }

        let mut state = self.state();
        state.batch_calls.push((Instant::now(), transactions.len()));

        let mut transactions = transactions;
        let unprocessed = match state.batch_faults.pop_front() {
            Some(BatchWriteFault::Error) => {
                return Err(Error::network_error().with_message("injected batch failure"));
            }
            Some(BatchWriteFault::Unprocessed(n)) => {
                let keep = transactions.len().saturating_sub(n);
                transactions.split_off(keep)
            }
            None => Vec::new(),
        };

        let mut output = BatchPutOutput {
            unprocessed,
            ..Default::default()
        };
        for transaction in transactions {
            let id = transaction.id.clone();
            match state.insert(transaction) {
                PutOutcome::Inserted => output.inserted.push(id),
                PutOutcome::AlreadyExists => output.duplicates.push(id),
            }
        }

        Ok(output)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.state().transactions.contains_key(id))
    }

    async fn exists_for_image(&self, image_id: &str) -> Result<bool> {
        Ok(self.state().images.contains_key(image_id))
    }

    async fn image_key_for(&self, image_id: &str) -> Result<Option<String>> {
        let state = self.state();
        Ok(state
            .images
            .get(image_id)
            .and_then(|id| state.transactions.get(id))
            .map(|tx| tx.image.key.clone()))
    }

    async fn existing_image_ids(&self, image_ids: Vec<String>) -> Result<HashSet<String>> {
        let state = self.state();
        Ok(image_ids
            .into_iter()
            .filter(|image_id| state.images.contains_key(image_id))
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

#[async_trait]
impl BatchJobStore for MemoryStore {
    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<BatchJob>> {
        Ok(self
            .state()
            .jobs
            .values()
            .find(|job| job.correlation_id == correlation_id)
            .cloned())
    }

    async fn mark_completed(&self, job_id: &str, counts: BatchCounts) -> Result<()> {
        let mut state = self.state();
        if state.fail_job_updates {
            return Err(Error::network_error().with_message("injected job update failure"));
        }

        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::not_found().with_message(format!("batch job {job_id}")))?;
        job.status = BatchJobStatus::Completed;
        job.counts = counts;
        job.updated_at = jiff::Timestamp::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn image_id_is_unique_across_ids() {
        let store = MemoryStore::new();
        let first = fixtures::transaction("tx_a", "img-1");
        let second = fixtures::transaction("tx_b", "img-1");

        assert!(store.put_if_absent(&first).await.unwrap().is_inserted());
        assert_eq!(
            store.put_if_absent(&second).await.unwrap(),
            PutOutcome::AlreadyExists
        );
        assert_eq!(store.len(), 1);
        assert!(store.exists_for_image("img-1").await.unwrap());
    }

    #[tokio::test]
    async fn injected_unprocessed_items_are_returned() {
        let store = MemoryStore::new();
        store.inject_batch_fault(BatchWriteFault::Unprocessed(2));

        let batch: Vec<_> = (0..5)
            .map(|i| fixtures::transaction(&format!("tx_{i}"), &format!("img-{i}")))
            .collect();
        let output = store.batch_put(batch).await.unwrap();

        assert_eq!(output.inserted.len(), 3);
        assert_eq!(output.unprocessed.len(), 2);
        assert_eq!(output.unprocessed[0].id, "tx_3");
        assert_eq!(store.batch_sizes(), vec![5]);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let store = MemoryStore::new().with_max_batch_size(2);
        let batch: Vec<_> = (0..3)
            .map(|i| fixtures::transaction(&format!("tx_{i}"), &format!("img-{i}")))
            .collect();
        assert!(store.batch_put(batch).await.is_err());
    }

    #[tokio::test]
    async fn job_completion_updates_counts() {
        let store = MemoryStore::new();
        store.insert_job(fixtures::batch_job("job-1", "corr-1"));

        let job = store.find_by_correlation_id("corr-1").await.unwrap().unwrap();
        let counts = BatchCounts {
            success: 3,
            failure: 1,
            total: 4,
        };
        store.mark_completed(&job.id, counts).await.unwrap();

        let job = store.job("job-1").unwrap();
        assert!(job.is_completed());
        assert_eq!(job.counts, counts);
        assert!(store.mark_completed("missing", counts).await.is_err());
    }
}
