//! Aggregated multi-backend extraction outcome.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use super::{BackendKind, ExtractionResult};

/// Overall status of a multi-backend comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComparisonStatus {
    /// At least one backend succeeded.
    Completed,
    /// Every backend failed.
    Failed,
}

/// Results of running every configured backend against one image.
///
/// Slots are kept in backend configuration order, one per backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    /// Image the backends ran against.
    pub image_id: String,
    /// One result per backend.
    pub results: Vec<ExtractionResult>,
    /// Derived status.
    pub status: ComparisonStatus,
    /// Number of successful backends.
    pub success_count: usize,
    /// Number of failed backends.
    pub failure_count: usize,
}

impl ComparisonResult {
    /// Aggregates per-backend results.
    ///
    /// The status is `failed` only when every slot failed, which includes
    /// the degenerate case of no configured backends.
    pub fn from_results(image_id: impl Into<String>, results: Vec<ExtractionResult>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;
        let status = if success_count > 0 {
            ComparisonStatus::Completed
        } else {
            ComparisonStatus::Failed
        };

        Self {
            image_id: image_id.into(),
            results,
            status,
            success_count,
            failure_count,
        }
    }

    /// Returns whether at least one backend succeeded.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == ComparisonStatus::Completed
    }

    /// Picks the result to persist.
    ///
    /// Prefers the `primary` backend when it succeeded, otherwise the first
    /// successful slot.
    pub fn select(&self, primary: Option<BackendKind>) -> Option<&ExtractionResult> {
        let successful = || self.results.iter().filter(|r| r.success);

        primary
            .and_then(|kind| successful().find(|r| r.backend == kind))
            .or_else(|| successful().next())
    }

    /// Returns whether every successful backend that reported a total agrees
    /// with the others within `tolerance`.
    pub fn totals_agree(&self, tolerance: f64) -> bool {
        let mut totals = self
            .results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.total);

        let Some(first) = totals.next() else {
            return true;
        };

        totals.all(|total| (total - first).abs() <= tolerance)
    }

    /// Returns the error messages of failed backends, keyed by backend.
    pub fn failures(&self) -> Vec<(BackendKind, &str)> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| (r.backend, r.error.as_deref().unwrap_or("unknown error")))
            .collect()
    }
}
