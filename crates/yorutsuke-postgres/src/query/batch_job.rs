//! Batch job repository.

use std::future::Future;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::model::{BatchJobRow, NewBatchJob, UpdateBatchJob};
use crate::{PgConnection, PgError, PgResult, TRACING_TARGET_QUERY, schema};

/// Repository for batch job rows.
pub trait BatchJobRepository {
    /// Creates a batch job.
    fn create_batch_job(
        &mut self,
        new_job: NewBatchJob,
    ) -> impl Future<Output = PgResult<BatchJobRow>> + Send;

    /// Finds a job through the unique correlation id index.
    fn find_batch_job_by_correlation_id(
        &mut self,
        correlation_id: &str,
    ) -> impl Future<Output = PgResult<Option<BatchJobRow>>> + Send;

    /// Applies a changeset to a job; returns `None` when no job has this id.
    fn update_batch_job(
        &mut self,
        job_id: &str,
        changes: UpdateBatchJob,
    ) -> impl Future<Output = PgResult<Option<BatchJobRow>>> + Send;
}

impl BatchJobRepository for PgConnection {
    async fn create_batch_job(&mut self, new_job: NewBatchJob) -> PgResult<BatchJobRow> {
        use schema::batch_jobs;

        diesel::insert_into(batch_jobs::table)
            .values(&new_job)
            .returning(BatchJobRow::as_returning())
            .get_result(self)
            .await
            .map_err(PgError::from)
    }

    async fn find_batch_job_by_correlation_id(
        &mut self,
        target_correlation_id: &str,
    ) -> PgResult<Option<BatchJobRow>> {
        use schema::batch_jobs::dsl::*;

        batch_jobs
            .filter(correlation_id.eq(target_correlation_id))
            .select(BatchJobRow::as_select())
            .first(self)
            .await
            .optional()
            .map_err(PgError::from)
    }

    async fn update_batch_job(
        &mut self,
        job_id: &str,
        changes: UpdateBatchJob,
    ) -> PgResult<Option<BatchJobRow>> {
        use schema::batch_jobs::dsl::*;

        let row = diesel::update(batch_jobs.filter(id.eq(job_id)))
            .set(&changes)
            .returning(BatchJobRow::as_returning())
            .get_result(self)
            .await
            .optional()
            .map_err(PgError::from)?;

        tracing::debug!(
            target: TRACING_TARGET_QUERY,
            job_id,
            status = %changes.status,
            found = row.is_some(),
            "batch job updated"
        );

        Ok(row)
    }
}
