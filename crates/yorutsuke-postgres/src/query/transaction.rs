//! Transaction repository.

use std::future::Future;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::model::{NewTransaction, TransactionRow};
use crate::{PgConnection, PgError, PgResult, TRACING_TARGET_QUERY, schema};

/// Repository for transaction rows.
///
/// Inserts never overwrite: a conflict on the primary key or on the unique
/// image identifier leaves the existing row untouched.
pub trait TransactionRepository {
    /// Inserts a transaction unless one with the same id or image exists.
    ///
    /// Returns `true` when the row was written by this call.
    fn insert_transaction_if_absent(
        &mut self,
        new_transaction: NewTransaction,
    ) -> impl Future<Output = PgResult<bool>> + Send;

    /// Inserts many transactions, skipping existing ones.
    ///
    /// Returns the ids that were written by this call.
    fn insert_transactions_if_absent(
        &mut self,
        new_transactions: Vec<NewTransaction>,
    ) -> impl Future<Output = PgResult<Vec<String>>> + Send;

    /// Finds a transaction by id.
    fn find_transaction_by_id(
        &mut self,
        transaction_id: &str,
    ) -> impl Future<Output = PgResult<Option<TransactionRow>>> + Send;

    /// Finds the transaction created for an image.
    fn find_transaction_by_image_id(
        &mut self,
        image_id: &str,
    ) -> impl Future<Output = PgResult<Option<TransactionRow>>> + Send;

    /// Returns which of the given image ids have a transaction.
    fn find_existing_image_ids(
        &mut self,
        image_ids: Vec<String>,
    ) -> impl Future<Output = PgResult<Vec<String>>> + Send;
}

impl TransactionRepository for PgConnection {
    async fn insert_transaction_if_absent(
        &mut self,
        new_transaction: NewTransaction,
    ) -> PgResult<bool> {
        use schema::transactions;

        let affected = diesel::insert_into(transactions::table)
            .values(&new_transaction)
            .on_conflict_do_nothing()
            .execute(self)
            .await
            .map_err(PgError::from)?;

        tracing::debug!(
            target: TRACING_TARGET_QUERY,
            transaction_id = %new_transaction.id,
            image_id = %new_transaction.image_id,
            inserted = affected == 1,
            "conditional transaction insert"
        );

        Ok(affected == 1)
    }

    async fn insert_transactions_if_absent(
        &mut self,
        new_transactions: Vec<NewTransaction>,
    ) -> PgResult<Vec<String>> {
        use schema::transactions;

        if new_transactions.is_empty() {
            return Ok(Vec::new());
        }

        let inserted: Vec<String> = diesel::insert_into(transactions::table)
            .values(&new_transactions)
            .on_conflict_do_nothing()
            .returning(transactions::id)
            .get_results(self)
            .await
            .map_err(PgError::from)?;

        tracing::debug!(
            target: TRACING_TARGET_QUERY,
            requested = new_transactions.len(),
            inserted = inserted.len(),
            "batch transaction insert"
        );

        Ok(inserted)
    }

    async fn find_transaction_by_id(
        &mut self,
        transaction_id: &str,
    ) -> PgResult<Option<TransactionRow>> {
        use schema::transactions::dsl::*;

        transactions
            .filter(id.eq(transaction_id))
            .select(TransactionRow::as_select())
            .first(self)
            .await
            .optional()
            .map_err(PgError::from)
    }

    async fn find_transaction_by_image_id(
        &mut self,
        target_image_id: &str,
    ) -> PgResult<Option<TransactionRow>> {
        use schema::transactions::dsl::*;

        transactions
            .filter(image_id.eq(target_image_id))
            .select(TransactionRow::as_select())
            .first(self)
            .await
            .optional()
            .map_err(PgError::from)
    }

    async fn find_existing_image_ids(&mut self, image_ids: Vec<String>) -> PgResult<Vec<String>> {
        use schema::transactions::dsl;

        if image_ids.is_empty() {
            return Ok(Vec::new());
        }

        dsl::transactions
            .filter(dsl::image_id.eq_any(image_ids))
            .select(dsl::image_id)
            .load(self)
            .await
            .map_err(PgError::from)
    }
}
