//! Validation issues and failures.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::ReceiptDraft;

/// A single problem found in an untrusted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Offending field, or `payload` for the whole value.
    pub field: String,
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ValidationIssue {
    /// Creates a new issue.
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a payload that did not pass the Airlock.
///
/// Keeps whatever could be coerced so a degraded record can still be built.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    /// Problems found, ordered by field.
    pub issues: Vec<ValidationIssue>,
    /// Coerced field values, valid or not.
    pub draft: ReceiptDraft,
    /// The payload as received.
    pub raw: Value,
}

impl ValidationFailure {
    /// Creates a failure with a single issue and no usable fields.
    pub fn single(issue: ValidationIssue, raw: Value) -> Self {
        Self {
            issues: vec![issue],
            draft: ReceiptDraft::default(),
            raw,
        }
    }

    /// Returns whether an issue was recorded for `field`.
    pub fn has_issue(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }

    /// Serializes the failure for storage with a degraded record.
    pub fn to_json(&self) -> Value {
        json!({
            "issues": self.issues,
            "raw": self.raw,
        })
    }
}
