//! Core store traits backed by PostgreSQL.

use std::collections::HashSet;

use async_trait::async_trait;
use yorutsuke_core::types::{BatchCounts, BatchJob, Transaction};
use yorutsuke_core::{BatchJobStore, BatchPutOutput, PutOutcome, Result, TransactionStore};

use crate::model::{NewTransaction, UpdateBatchJob};
use crate::query::{BatchJobRepository, TransactionRepository};
use crate::{PgClient, PgError, TRACING_TARGET_QUERY};

/// [`TransactionStore`] and [`BatchJobStore`] over a [`PgClient`] pool.
///
/// Uniqueness of both the transaction id and the image id is enforced by the
/// schema, so conditional writes need no locking.
#[derive(Clone)]
pub struct PgStore {
    client: PgClient,
}

impl PgStore {
    /// Creates a store over an existing client.
    pub fn new(client: PgClient) -> Self {
        Self { client }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &PgClient {
        &self.client
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn put_if_absent(&self, transaction: &Transaction) -> Result<PutOutcome> {
        let mut conn = self.client.get_connection().await?;
        let inserted = conn
            .insert_transaction_if_absent(NewTransaction::from(transaction))
            .await?;

        Ok(if inserted {
            PutOutcome::Inserted
        } else {
            PutOutcome::AlreadyExists
        })
    }

    async fn batch_put(&self, transactions: Vec<Transaction>) -> Result<BatchPutOutput> {
        if transactions.is_empty() {
            return Ok(BatchPutOutput::default());
        }

        let rows: Vec<NewTransaction> = transactions.iter().map(NewTransaction::from).collect();
        let written = match self.client.get_connection().await {
            Ok(mut conn) => conn.insert_transactions_if_absent(rows).await,
            Err(err) => Err(err),
        };

        let inserted = match written {
            Ok(inserted) => inserted,
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    target: TRACING_TARGET_QUERY,
                    error = %err,
                    items = transactions.len(),
                    "batch insert failed transiently, reporting chunk as unprocessed"
                );
                return Ok(BatchPutOutput {
                    unprocessed: transactions,
                    ..Default::default()
                });
            }
            Err(err) => return Err(err.into()),
        };

        let duplicates = unwritten_ids(&transactions, &inserted);

        Ok(BatchPutOutput {
            inserted,
            duplicates,
            unprocessed: Vec::new(),
        })
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let mut conn = self.client.get_connection().await?;
        Ok(conn.find_transaction_by_id(id).await?.is_some())
    }

    async fn exists_for_image(&self, image_id: &str) -> Result<bool> {
        let mut conn = self.client.get_connection().await?;
        Ok(conn.find_transaction_by_image_id(image_id).await?.is_some())
    }

    async fn image_key_for(&self, image_id: &str) -> Result<Option<String>> {
        let mut conn = self.client.get_connection().await?;
        let row = conn.find_transaction_by_image_id(image_id).await?;
        Ok(row.map(|row| row.image_key))
    }

    async fn existing_image_ids(&self, image_ids: Vec<String>) -> Result<HashSet<String>> {
        let mut conn = self.client.get_connection().await?;
        let found = conn.find_existing_image_ids(image_ids).await?;
        Ok(found.into_iter().collect())
    }
}

/// Returns the ids of the requested transactions that were not written.
///
/// `RETURNING` yields a repeated id once, so only the first copy of an id
/// in the chunk counts as written.
fn unwritten_ids(requested: &[Transaction], inserted: &[String]) -> Vec<String> {
    let mut written: HashSet<&str> = inserted.iter().map(String::as_str).collect();
    requested
        .iter()
        .filter(|tx| !written.remove(tx.id.as_str()))
        .map(|tx| tx.id.clone())
        .collect()
}

#[async_trait]
impl BatchJobStore for PgStore {
    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<BatchJob>> {
        let mut conn = self.client.get_connection().await?;
        let row = conn.find_batch_job_by_correlation_id(correlation_id).await?;
        Ok(row.map(BatchJob::try_from).transpose()?)
    }

    async fn mark_completed(&self, job_id: &str, counts: BatchCounts) -> Result<()> {
        let mut conn = self.client.get_connection().await?;
        let updated = conn
            .update_batch_job(job_id, UpdateBatchJob::completed(counts))
            .await?;

        match updated {
            Some(_) => Ok(()),
            None => Err(PgError::Query(diesel::result::Error::NotFound).into()),
        }
    }
}
