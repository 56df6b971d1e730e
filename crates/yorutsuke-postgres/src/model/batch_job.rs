//! Batch job rows.

use diesel::prelude::*;
use jiff_diesel::Timestamp;
use yorutsuke_core::types::{BatchCounts, BatchJob, BatchJobStatus};

use super::transaction::parse_column;
use crate::schema::batch_jobs;
use crate::{PgError, PgResult};

/// A row of the `batch_jobs` table.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = batch_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BatchJobRow {
    pub id: String,
    pub correlation_id: String,
    pub owner_id: String,
    pub status: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub total_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Data for creating a batch job.
///
/// Jobs are normally created by the scheduler; this exists for tooling and
/// tests.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = batch_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewBatchJob {
    pub id: String,
    pub correlation_id: String,
    pub owner_id: String,
}

/// Changes applied when a job completes.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = batch_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UpdateBatchJob {
    pub status: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub total_count: i64,
    pub updated_at: Timestamp,
}

impl UpdateBatchJob {
    /// Builds the completion changeset.
    pub fn completed(counts: BatchCounts) -> Self {
        let clamp = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
        Self {
            status: BatchJobStatus::Completed.to_string(),
            success_count: clamp(counts.success),
            failure_count: clamp(counts.failure),
            total_count: clamp(counts.total),
            updated_at: jiff::Timestamp::now().into(),
        }
    }
}

impl TryFrom<BatchJobRow> for BatchJob {
    type Error = PgError;

    fn try_from(row: BatchJobRow) -> PgResult<Self> {
        let count = |column: &'static str, n: i64| {
            u64::try_from(n).map_err(|_| PgError::InvalidColumn {
                column,
                value: n.to_string(),
            })
        };

        Ok(Self {
            status: parse_column("status", &row.status)?,
            counts: BatchCounts {
                success: count("success_count", row.success_count)?,
                failure: count("failure_count", row.failure_count)?,
                total: count("total_count", row.total_count)?,
            },
            id: row.id,
            correlation_id: row.correlation_id,
            owner_id: row.owner_id,
            created_at: row.created_at.into(),
            updated_at: row.updated_at.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_changeset() {
        let update = UpdateBatchJob::completed(BatchCounts {
            success: 100,
            failure: 5,
            total: 105,
        });
        assert_eq!(update.status, "COMPLETED");
        assert_eq!(update.total_count, 105);
    }

    #[test]
    fn row_maps_to_domain() {
        let row = BatchJobRow {
            id: "job-pk".into(),
            correlation_id: "job-1".into(),
            owner_id: "owner-1".into(),
            status: "PENDING".into(),
            success_count: 0,
            failure_count: 0,
            total_count: 0,
            created_at: jiff::Timestamp::UNIX_EPOCH.into(),
            updated_at: jiff::Timestamp::UNIX_EPOCH.into(),
        };

        let job = BatchJob::try_from(row).unwrap();
        assert_eq!(job.status, BatchJobStatus::Pending);
        assert!(!job.is_completed());
    }
}
