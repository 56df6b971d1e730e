//! Transaction rows.

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use jiff_diesel::{Date, Timestamp};
use yorutsuke_core::types::{ImageLocation, Transaction};

use crate::schema::transactions;
use crate::{PgError, PgResult};

/// A row of the `transactions` table.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TransactionRow {
    pub id: String,
    pub image_id: String,
    pub owner_id: String,
    pub amount: BigDecimal,
    pub transaction_type: String,
    pub transaction_date: Date,
    pub merchant: String,
    pub category: String,
    pub description: String,
    pub status: String,
    pub version: i32,
    pub image_bucket: String,
    pub image_key: String,
    pub extracted_by: Option<String>,
    pub validation_errors: Option<serde_json::Value>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Data for inserting a new transaction.
///
/// Every column is written explicitly so the row matches the domain record
/// byte for byte.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewTransaction {
    pub id: String,
    pub image_id: String,
    pub owner_id: String,
    pub amount: BigDecimal,
    pub transaction_type: String,
    pub transaction_date: Date,
    pub merchant: String,
    pub category: String,
    pub description: String,
    pub status: String,
    pub version: i32,
    pub image_bucket: String,
    pub image_key: String,
    pub extracted_by: Option<String>,
    pub validation_errors: Option<serde_json::Value>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&Transaction> for NewTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            image_id: tx.image_id.clone(),
            owner_id: tx.owner_id.clone(),
            amount: tx.amount.clone(),
            transaction_type: tx.transaction_type.as_str().to_owned(),
            transaction_date: tx.date.into(),
            merchant: tx.merchant.clone(),
            category: tx.category.as_str().to_owned(),
            description: tx.description.clone(),
            status: tx.status.as_str().to_owned(),
            version: tx.version,
            image_bucket: tx.image.bucket.clone(),
            image_key: tx.image.key.clone(),
            extracted_by: tx.extracted_by.clone(),
            validation_errors: tx.validation_errors.clone(),
            expires_at: tx.expires_at.map(Into::into),
            created_at: tx.created_at.into(),
            updated_at: tx.updated_at.into(),
        }
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = PgError;

    fn try_from(row: TransactionRow) -> PgResult<Self> {
        Ok(Self {
            transaction_type: parse_column("transaction_type", &row.transaction_type)?,
            category: parse_column("category", &row.category)?,
            status: parse_column("status", &row.status)?,
            id: row.id,
            image_id: row.image_id,
            owner_id: row.owner_id,
            amount: row.amount,
            date: row.transaction_date.into(),
            merchant: row.merchant,
            description: row.description,
            version: row.version,
            created_at: row.created_at.into(),
            updated_at: row.updated_at.into(),
            expires_at: row.expires_at.map(Into::into),
            image: ImageLocation::new(row.image_bucket, row.image_key),
            extracted_by: row.extracted_by,
            validation_errors: row.validation_errors,
        })
    }
}

/// Parses a TEXT column holding a strum-serialized enum.
pub(crate) fn parse_column<T: std::str::FromStr>(column: &'static str, value: &str) -> PgResult<T> {
    value.parse().map_err(|_| PgError::InvalidColumn {
        column,
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use jiff::civil::date;
    use yorutsuke_core::types::{Category, TransactionStatus, TransactionType};

    use super::*;

    fn transaction() -> Transaction {
        Transaction {
            id: "tx_0123".into(),
            image_id: "img-1".into(),
            owner_id: "owner-1".into(),
            amount: BigDecimal::from_str("12.50").unwrap(),
            transaction_type: TransactionType::Expense,
            date: date(2025, 5, 1),
            merchant: "Lawson".into(),
            category: Category::Food,
            description: "Lawson".into(),
            status: TransactionStatus::NeedsReview,
            version: 1,
            created_at: jiff::Timestamp::UNIX_EPOCH,
            updated_at: jiff::Timestamp::UNIX_EPOCH,
            expires_at: None,
            image: ImageLocation::new("bucket", "receipts/owner-1/img-1.jpg"),
            extracted_by: Some("gemini:flash".into()),
            validation_errors: None,
        }
    }

    #[test]
    fn enums_are_stored_as_text() {
        let row = NewTransaction::from(&transaction());
        assert_eq!(row.transaction_type, "expense");
        assert_eq!(row.category, "food");
        assert_eq!(row.status, "needs_review");
        assert_eq!(row.image_key, "receipts/owner-1/img-1.jpg");
    }

    #[test]
    fn unknown_stored_value_is_rejected() {
        let err = parse_column::<Category>("category", "groceries").unwrap_err();
        assert!(matches!(err, PgError::InvalidColumn { column: "category", .. }));
    }
}
