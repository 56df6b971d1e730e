//! Coercion of untrusted JSON into a validatable draft.

use std::str::FromStr;

use jiff::civil::Date;
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

use super::{MAX_AMOUNT, MIN_AMOUNT, ValidationIssue};
use crate::types::{Category, TransactionType};

/// Longest accepted merchant name.
pub const MAX_MERCHANT_LEN: u64 = 200;

/// Longest accepted description.
pub const MAX_DESCRIPTION_LEN: u64 = 1000;

/// Field values after coercion, before validation.
#[derive(Debug, Clone, Default, PartialEq, Validate)]
pub struct ReceiptDraft {
    #[validate(required(code = "required", message = "amount is required"))]
    #[validate(range(min = MIN_AMOUNT, max = MAX_AMOUNT, code = "out_of_range"))]
    pub amount: Option<f64>,

    #[validate(required(code = "required", message = "type is required"))]
    #[validate(custom(function = "validate_transaction_type"))]
    pub transaction_type: Option<String>,

    /// Normalized to `YYYY-MM-DD` during coercion.
    #[validate(required(code = "required", message = "date is required"))]
    #[validate(custom(function = "validate_date"))]
    pub date: Option<String>,

    #[validate(required(code = "required", message = "merchant is required"))]
    #[validate(length(min = 1, max = MAX_MERCHANT_LEN, code = "length"))]
    pub merchant: Option<String>,

    #[validate(required(code = "required", message = "category is required"))]
    #[validate(custom(function = "validate_category"))]
    pub category: Option<String>,

    #[validate(length(max = MAX_DESCRIPTION_LEN, code = "length"))]
    pub description: Option<String>,
}

impl ReceiptDraft {
    /// Coerces a JSON object into a draft.
    ///
    /// Values of the wrong JSON type, or strings that do not coerce, are
    /// reported as issues and left unset.
    pub fn from_object(object: &Map<String, Value>) -> (Self, Vec<ValidationIssue>) {
        let mut issues = Vec::new();
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| object.get(*name))
                .filter(|value| !value.is_null())
        };

        let amount = field(&["amount", "total"]).and_then(|value| {
            coerce_amount(value).or_else(|| {
                issues.push(ValidationIssue::new(
                    "amount",
                    "not_a_number",
                    format!("amount is not a number: {value}"),
                ));
                None
            })
        });

        let mut text = |name: &'static str, aliases: &[&str]| {
            field(aliases).and_then(|value| match value {
                Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
                Value::Number(n) => Some(n.to_string()),
                other => {
                    issues.push(ValidationIssue::new(
                        name,
                        "not_a_string",
                        format!("{name} must be a string, got {other}"),
                    ));
                    None
                }
            })
        };

        let transaction_type = text("type", &["type", "transaction_type"]).map(|s| s.to_lowercase());
        let date = text("date", &["date"]).map(|s| normalize_date(&s));
        let merchant = text("merchant", &["merchant", "vendor"]);
        let category = text("category", &["category"]).map(|s| s.to_lowercase());
        let description = text("description", &["description"]);

        let draft = Self {
            amount,
            transaction_type,
            date,
            merchant,
            category,
            description,
        };

        (draft, issues)
    }

    /// Returns the description, defaulting to the merchant.
    pub fn description_or_merchant(&self) -> Option<String> {
        self.description.clone().or_else(|| self.merchant.clone())
    }
}

/// Coerces a JSON number or numeric string into an amount.
///
/// Strings may carry whitespace, currency symbols and thousands separators.
pub fn coerce_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };

    amount.is_finite().then_some(amount)
}

/// Rewrites `YYYY/MM/DD` as `YYYY-MM-DD`; other shapes pass through.
fn normalize_date(input: &str) -> String {
    let parts: Vec<&str> = input.split('/').collect();
    match parts.as_slice() {
        [y, m, d] if y.len() == 4 && m.len() == 2 && d.len() == 2 => format!("{y}-{m}-{d}"),
        _ => input.to_owned(),
    }
}

fn validate_transaction_type(value: &str) -> Result<(), ValidationError> {
    TransactionType::from_str(value)
        .map(|_| ())
        .map_err(|_| invalid("invalid_enum", "type must be income or expense"))
}

fn validate_category(value: &str) -> Result<(), ValidationError> {
    Category::from_str(value)
        .map(|_| ())
        .map_err(|_| invalid("invalid_enum", "category is not in the taxonomy"))
}

fn validate_date(value: &str) -> Result<(), ValidationError> {
    let shaped = value.len() == 10
        && value
            .char_indices()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });

    if !shaped || value.parse::<Date>().is_err() {
        return Err(invalid("invalid_date", "date must be YYYY-MM-DD or YYYY/MM/DD"));
    }
    Ok(())
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}
