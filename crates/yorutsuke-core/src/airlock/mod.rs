//! The Airlock: the single trust boundary for model output.
//!
//! Everything a backend or a batch result file produces is untrusted JSON.
//! [`validate`] coerces it into a [`ReceiptDraft`], checks required fields,
//! ranges and enum membership, and returns either a [`ValidRecord`] or a
//! [`ValidationFailure`] that still carries whatever could be coerced.

mod draft;
mod failure;

use std::str::FromStr;

use jiff::civil::Date;
use serde_json::Value;
use validator::{Validate, ValidationErrors};

pub use self::draft::{MAX_DESCRIPTION_LEN, MAX_MERCHANT_LEN, ReceiptDraft, coerce_amount};
pub use self::failure::{ValidationFailure, ValidationIssue};
use crate::TRACING_TARGET_AIRLOCK;
use crate::types::{Category, TransactionType};

/// Smallest accepted amount; amounts are stored with two decimals.
pub const MIN_AMOUNT: f64 = 0.01;

/// Largest accepted amount.
pub const MAX_AMOUNT: f64 = 10_000_000_000.0;

/// A record that passed every Airlock check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord {
    pub amount: f64,
    pub transaction_type: TransactionType,
    pub date: Date,
    pub merchant: String,
    pub category: Category,
    /// Defaults to the merchant.
    pub description: String,
}

/// Validates an untrusted payload.
pub fn validate(raw: &Value) -> Result<ValidRecord, ValidationFailure> {
    let Some(object) = raw.as_object() else {
        tracing::debug!(target: TRACING_TARGET_AIRLOCK, "payload is not an object");
        return Err(ValidationFailure::single(
            ValidationIssue::new("payload", "not_an_object", "payload must be a JSON object"),
            raw.clone(),
        ));
    };

    let (draft, mut issues) = ReceiptDraft::from_object(object);

    if let Err(errors) = draft.validate() {
        let coerced: Vec<String> = issues.iter().map(|i| i.field.clone()).collect();
        issues.extend(
            issues_from(&errors)
                .into_iter()
                .filter(|issue| !coerced.contains(&issue.field)),
        );
    }

    if !issues.is_empty() {
        issues.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.code.cmp(&b.code)));
        tracing::debug!(
            target: TRACING_TARGET_AIRLOCK,
            issues = issues.len(),
            fields = ?issues.iter().map(|i| i.field.as_str()).collect::<Vec<_>>(),
            "payload rejected"
        );
        return Err(ValidationFailure {
            issues,
            draft,
            raw: raw.clone(),
        });
    }

    match into_record(&draft) {
        Some(record) => Ok(record),
        None => Err(ValidationFailure {
            issues: vec![ValidationIssue::new(
                "payload",
                "inconsistent",
                "validated draft could not be converted",
            )],
            draft,
            raw: raw.clone(),
        }),
    }
}

fn into_record(draft: &ReceiptDraft) -> Option<ValidRecord> {
    let merchant = draft.merchant.clone()?;
    Some(ValidRecord {
        amount: draft.amount?,
        transaction_type: TransactionType::from_str(draft.transaction_type.as_deref()?).ok()?,
        date: draft.date.as_deref()?.parse().ok()?,
        category: Category::from_str(draft.category.as_deref()?).ok()?,
        description: draft.description_or_merchant().unwrap_or_else(|| merchant.clone()),
        merchant,
    })
}

fn issues_from(errors: &ValidationErrors) -> Vec<ValidationIssue> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, field_errors)| {
            let field = public_field_name(field);
            field_errors.iter().map(move |error| {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{field} failed validation: {}", error.code));
                ValidationIssue::new(field, error.code.to_string(), message)
            })
        })
        .collect()
}

fn public_field_name(field: &str) -> &str {
    match field {
        "transaction_type" => "type",
        other => other,
    }
}
