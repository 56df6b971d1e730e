//! Parent record of a bulk extraction job.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Lifecycle status of a batch job.
///
/// Jobs are created `PENDING` by the scheduler and moved to `COMPLETED`
/// once their result file has been ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchJobStatus {
    /// Submitted, results not yet ingested.
    Pending,
    /// Result file ingested.
    Completed,
}

/// Aggregate outcome of ingesting one result file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCounts {
    /// Records persisted (inserted or already present).
    pub success: u64,
    /// Records that could not be persisted.
    pub failure: u64,
    /// Records seen.
    pub total: u64,
}

/// A batch extraction job owned by an external scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    /// Primary identifier.
    pub id: String,
    /// Extraction provider job handle; the identifier encoded in result paths.
    pub correlation_id: String,
    /// Owner that submitted the job.
    pub owner_id: String,
    /// Current status.
    pub status: BatchJobStatus,
    /// Counts recorded at completion.
    pub counts: BatchCounts,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
}

impl BatchJob {
    /// Returns whether the job has already been completed.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == BatchJobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_screaming_case() {
        assert_eq!(BatchJobStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(
            "PENDING".parse::<BatchJobStatus>().unwrap(),
            BatchJobStatus::Pending
        );
        assert_eq!(
            serde_json::to_string(&BatchJobStatus::Pending).unwrap(),
            "\"PENDING\""
        );
    }
}
