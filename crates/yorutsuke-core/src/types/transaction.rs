//! The durable transaction record.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use jiff::Timestamp;
use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::airlock::{MAX_AMOUNT, MIN_AMOUNT, ValidRecord, ValidationFailure};

/// Merchant used when a degraded record carries no usable merchant.
const UNKNOWN_MERCHANT: &str = "unknown";

/// Whether money came in or went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString, EnumIter, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    /// Money received.
    Income,
    /// Money spent.
    Expense,
}

impl TransactionType {
    /// Returns the stable lowercase name.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Spending or income category.
///
/// `Sales` is the only income category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString, EnumIter, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Food,
    Transport,
    Supplies,
    Utilities,
    Communication,
    Entertainment,
    Travel,
    Fees,
    Sales,
    Other,
}

impl Category {
    /// Returns the stable lowercase name.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Returns whether this is an income category.
    #[inline]
    pub fn is_income(self) -> bool {
        matches!(self, Self::Sales)
    }
}

/// Review status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    /// Extracted and validated, awaiting owner confirmation.
    Unconfirmed,
    /// Degraded or doubtful; the owner must review it.
    NeedsReview,
    /// Confirmed by the owner.
    Confirmed,
}

impl TransactionStatus {
    /// Returns the stable snake_case name.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Object-store location of the source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLocation {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
}

impl ImageLocation {
    /// Creates a new image location.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Where a transaction came from, independent of what was extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOrigin {
    /// Image identifier.
    pub image_id: String,
    /// Owner of the image.
    pub owner_id: String,
    /// Permanent location of the source image.
    pub image: ImageLocation,
    /// `backend:model` label of the producer, when known.
    pub extracted_by: Option<String>,
    /// Expiry of the record, when a TTL is configured.
    pub expires_at: Option<Timestamp>,
}

/// A persisted financial transaction.
///
/// Created exactly once per image identifier and never deleted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Stable identifier derived from the image (or job and image).
    pub id: String,
    /// Image identifier; unique across all transactions.
    pub image_id: String,
    /// Owner identifier.
    pub owner_id: String,
    /// Monetary amount with two decimal places.
    pub amount: BigDecimal,
    /// Income or expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Transaction date.
    pub date: Date,
    /// Merchant name.
    pub merchant: String,
    /// Category.
    pub category: Category,
    /// Free-text description.
    pub description: String,
    /// Review status.
    pub status: TransactionStatus,
    /// Record version, starting at 1.
    pub version: i32,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
    /// Optional expiry.
    pub expires_at: Option<Timestamp>,
    /// Location of the source image.
    pub image: ImageLocation,
    /// `backend:model` label of the producer.
    pub extracted_by: Option<String>,
    /// Serialized validation failure of a degraded record.
    pub validation_errors: Option<Value>,
}

impl Transaction {
    /// Builds a transaction from a record that passed validation.
    pub fn from_valid(
        id: impl Into<String>,
        record: ValidRecord,
        origin: TransactionOrigin,
        status: TransactionStatus,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            image_id: origin.image_id,
            owner_id: origin.owner_id,
            amount: decimal_amount(record.amount),
            transaction_type: record.transaction_type,
            date: record.date,
            merchant: record.merchant,
            category: record.category,
            description: record.description,
            status,
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at: origin.expires_at,
            image: origin.image,
            extracted_by: origin.extracted_by,
            validation_errors: None,
        }
    }

    /// Builds a degraded record from a validation failure.
    ///
    /// Each field keeps its coerced value when that value is usable on its
    /// own and otherwise falls back: amount to zero, type to `expense`,
    /// category to `other`, date to `fallback_date`, merchant to `unknown`.
    /// The record always needs review and carries the failure payload.
    pub fn degraded(
        id: impl Into<String>,
        failure: &ValidationFailure,
        origin: TransactionOrigin,
        fallback_date: Date,
        now: Timestamp,
    ) -> Self {
        let draft = &failure.draft;

        let amount = draft
            .amount
            .filter(|amount| (MIN_AMOUNT..=MAX_AMOUNT).contains(amount))
            .unwrap_or(0.0);
        let transaction_type = draft
            .transaction_type
            .as_deref()
            .and_then(|t| TransactionType::from_str(t).ok())
            .unwrap_or(TransactionType::Expense);
        let category = draft
            .category
            .as_deref()
            .and_then(|c| Category::from_str(c).ok())
            .unwrap_or(Category::Other);
        let date = draft
            .date
            .as_deref()
            .and_then(|d| d.parse::<Date>().ok())
            .unwrap_or(fallback_date);
        let merchant = draft
            .merchant
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| UNKNOWN_MERCHANT.to_owned());
        let description = draft
            .description
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| merchant.clone());

        Self {
            id: id.into(),
            image_id: origin.image_id,
            owner_id: origin.owner_id,
            amount: decimal_amount(amount),
            transaction_type,
            date,
            merchant,
            category,
            description,
            status: TransactionStatus::NeedsReview,
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at: origin.expires_at,
            image: origin.image,
            extracted_by: origin.extracted_by,
            validation_errors: Some(failure.to_json()),
        }
    }

    /// Returns whether this record was persisted in degraded form.
    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.validation_errors.is_some()
    }
}

/// Converts a validated amount to a two-decimal value.
fn decimal_amount(amount: f64) -> BigDecimal {
    BigDecimal::from_str(&format!("{amount:.2}")).unwrap_or_else(|_| BigDecimal::from(0_i64))
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;
    use serde_json::json;

    use super::*;
    use crate::airlock;

    fn origin() -> TransactionOrigin {
        TransactionOrigin {
            image_id: "img-1".into(),
            owner_id: "owner-1".into(),
            image: ImageLocation::new("bucket", "receipts/owner-1/img-1.jpg"),
            extracted_by: Some("openai:gpt-4o".into()),
            expires_at: None,
        }
    }

    #[test]
    fn valid_record_becomes_unconfirmed_transaction() {
        let record = airlock::validate(&json!({
            "amount": "1,280",
            "type": "Expense",
            "date": "2025/01/15",
            "merchant": "Lawson",
            "category": "food",
        }))
        .unwrap();

        let tx = Transaction::from_valid(
            "tx_1",
            record,
            origin(),
            TransactionStatus::Unconfirmed,
            Timestamp::UNIX_EPOCH,
        );

        assert_eq!(tx.amount, BigDecimal::from_str("1280.00").unwrap());
        assert_eq!(tx.date, date(2025, 1, 15));
        assert_eq!(tx.description, "Lawson");
        assert_eq!(tx.version, 1);
        assert!(!tx.is_degraded());
    }

    #[test]
    fn degraded_record_falls_back() {
        let failure = airlock::validate(&json!({
            "amount": -5,
            "type": "refund",
            "category": "groceries",
        }))
        .unwrap_err();

        let tx = Transaction::degraded(
            "tx_2",
            &failure,
            origin(),
            date(2025, 2, 1),
            Timestamp::UNIX_EPOCH,
        );

        assert_eq!(tx.status, TransactionStatus::NeedsReview);
        assert_eq!(tx.amount, BigDecimal::from(0_i64));
        assert_eq!(tx.transaction_type, TransactionType::Expense);
        assert_eq!(tx.category, Category::Other);
        assert_eq!(tx.date, date(2025, 2, 1));
        assert_eq!(tx.merchant, "unknown");
        assert!(tx.validation_errors.unwrap()["issues"].as_array().unwrap().len() >= 4);
    }

    #[test]
    fn degraded_record_keeps_usable_fields() {
        let failure = airlock::validate(&json!({
            "amount": "980",
            "date": "2025-03-02",
            "merchant": "FamilyMart",
        }))
        .unwrap_err();

        let tx = Transaction::degraded(
            "tx_3",
            &failure,
            origin(),
            date(2025, 4, 1),
            Timestamp::UNIX_EPOCH,
        );

        assert_eq!(tx.amount, BigDecimal::from_str("980.00").unwrap());
        assert_eq!(tx.date, date(2025, 3, 2));
        assert_eq!(tx.merchant, "FamilyMart");
    }

    #[test]
    fn valid_amount_never_rounds_to_zero() {
        let record = airlock::validate(&json!({
            "amount": 0.01,
            "type": "expense",
            "date": "2025-01-15",
            "merchant": "Kiosk",
            "category": "food",
        }))
        .unwrap();
        let tx = Transaction::from_valid(
            "tx_4",
            record,
            origin(),
            TransactionStatus::Unconfirmed,
            Timestamp::UNIX_EPOCH,
        );
        assert_eq!(tx.amount, BigDecimal::from_str("0.01").unwrap());

        let failure = airlock::validate(&json!({
            "amount": 0.004,
            "type": "expense",
            "date": "2025-01-15",
            "merchant": "Kiosk",
            "category": "food",
        }))
        .unwrap_err();
        let tx = Transaction::degraded(
            "tx_5",
            &failure,
            origin(),
            date(2025, 4, 1),
            Timestamp::UNIX_EPOCH,
        );
        assert_eq!(tx.status, TransactionStatus::NeedsReview);
        assert_eq!(tx.amount, BigDecimal::from(0_i64));
    }

    #[test]
    fn only_sales_is_income() {
        assert!(Category::Sales.is_income());
        assert!(!Category::Food.is_income());
        assert_eq!("needs_review".parse::<TransactionStatus>().unwrap(), TransactionStatus::NeedsReview);
    }
}
