//! Chunked writes with retry of unprocessed items.

use yorutsuke_core::TransactionStore;
use yorutsuke_core::types::Transaction;

use crate::{RetryConfig, TRACING_TARGET_BATCH};

/// Result of writing one chunk.
#[derive(Debug, Default)]
pub(crate) struct ChunkOutcome {
    /// Identifiers written.
    pub inserted: Vec<String>,
    /// Identifiers that already existed.
    pub duplicates: Vec<String>,
    /// Items still unwritten after every retry, or rejected permanently.
    pub failed: Vec<Transaction>,
}

/// Writes chunks, retrying only what the store left unprocessed.
pub(crate) struct ChunkWriter<'a> {
    store: &'a dyn TransactionStore,
    retry: RetryConfig,
}

impl<'a> ChunkWriter<'a> {
    pub fn new(store: &'a dyn TransactionStore, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Writes one chunk of at most the store's batch limit.
    ///
    /// A transient store error counts the whole attempt as unprocessed; any
    /// other error fails the chunk without retrying.
    pub async fn write(&self, chunk: Vec<Transaction>) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        let mut pending = chunk;
        let mut attempt = 0_u32;

        loop {
            let unprocessed = match self.store.batch_put(pending.clone()).await {
                Ok(output) => {
                    outcome.inserted.extend(output.inserted);
                    outcome.duplicates.extend(output.duplicates);
                    output.unprocessed
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        target: TRACING_TARGET_BATCH,
                        attempt,
                        items = pending.len(),
                        error = %err,
                        "batch write failed transiently"
                    );
                    pending
                }
                Err(err) => {
                    tracing::error!(
                        target: TRACING_TARGET_BATCH,
                        items = pending.len(),
                        error = %err,
                        "batch write rejected"
                    );
                    outcome.failed = pending;
                    return outcome;
                }
            };

            if unprocessed.is_empty() {
                return outcome;
            }

            if attempt >= self.retry.max_retries {
                tracing::error!(
                    target: TRACING_TARGET_BATCH,
                    retries = attempt,
                    items = unprocessed.len(),
                    "unprocessed items remain after retries"
                );
                outcome.failed = unprocessed;
                return outcome;
            }

            let backoff = self.retry.calculate_backoff(attempt);
            tracing::debug!(
                target: TRACING_TARGET_BATCH,
                attempt = attempt + 1,
                max_retries = self.retry.max_retries,
                items = unprocessed.len(),
                backoff_ms = backoff.as_millis(),
                "retrying unprocessed items after backoff"
            );
            tokio::time::sleep(backoff).await;

            attempt += 1;
            pending = unprocessed;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use yorutsuke_test::{BatchWriteFault, MemoryStore, fixtures};

    use super::*;

    fn chunk(n: usize) -> Vec<Transaction> {
        (0..n)
            .map(|i| fixtures::transaction(&format!("tx_{i}"), &format!("img-{i}")))
            .collect()
    }

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig::new(max_retries, Duration::from_millis(100))
            .with_max_backoff(Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_only_unprocessed_with_doubling_delay() {
        let store = MemoryStore::new();
        store.inject_batch_fault(BatchWriteFault::Unprocessed(3));
        store.inject_batch_fault(BatchWriteFault::Unprocessed(1));

        let outcome = ChunkWriter::new(&store, retry(3)).write(chunk(5)).await;

        assert_eq!(outcome.inserted.len(), 5);
        assert!(outcome.failed.is_empty());
        assert_eq!(store.batch_sizes(), vec![5, 3, 1]);

        let times = store.batch_call_times();
        let first = times[1] - times[0];
        let second = times[2] - times[1];
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(150));
        assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_remaining_items() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.inject_batch_fault(BatchWriteFault::Unprocessed(2));
        }

        let outcome = ChunkWriter::new(&store, retry(2)).write(chunk(5)).await;

        assert_eq!(outcome.inserted.len(), 3);
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(store.batch_sizes(), vec![5, 2, 2]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_retries_whole_chunk() {
        let store = MemoryStore::new();
        store.inject_batch_fault(BatchWriteFault::Error);

        let outcome = ChunkWriter::new(&store, retry(1)).write(chunk(4)).await;

        assert_eq!(outcome.inserted.len(), 4);
        assert_eq!(store.batch_sizes(), vec![4, 4]);
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected_without_retry() {
        let store = MemoryStore::new().with_max_batch_size(2);

        let outcome = ChunkWriter::new(&store, retry(3)).write(chunk(3)).await;

        assert_eq!(outcome.failed.len(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn duplicates_are_reported() {
        let store = MemoryStore::new();
        store.seed(fixtures::transaction("tx_0", "img-0"));

        let outcome = ChunkWriter::new(&store, retry(0)).write(chunk(2)).await;

        assert_eq!(outcome.inserted, vec!["tx_1".to_owned()]);
        assert_eq!(outcome.duplicates, vec!["tx_0".to_owned()]);
    }
}
