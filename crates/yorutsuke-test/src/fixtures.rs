//! Canned inputs for tests.

use jiff::Timestamp;
use jiff::civil::date;
use serde_json::{Value, json};
use yorutsuke_core::types::{
    BackendKind, BatchCounts, BatchJob, BatchJobStatus, Category, ExtractionResult, ImageLocation,
    ReceiptImage, Transaction, TransactionStatus, TransactionType,
};

/// A small JPEG-typed receipt image.
pub fn image(image_id: &str) -> ReceiptImage {
    ReceiptImage::new(image_id, &b"\xff\xd8\xff\xe0 receipt"[..], "image/jpeg")
}

/// A receipt payload that passes the Airlock.
pub fn receipt_json() -> Value {
    json!({
        "amount": 1280,
        "type": "expense",
        "date": "2025-01-15",
        "merchant": "Lawson",
        "category": "food",
        "description": "lunch",
    })
}

/// A successful extraction carrying every field the Airlock requires.
pub fn extraction(backend: BackendKind, total: f64) -> ExtractionResult {
    let mut result = ExtractionResult::new(backend, format!("{backend}-model"));
    result.vendor = Some("Lawson".to_owned());
    result.total = Some(total);
    result.currency = Some("JPY".to_owned());
    result.date = Some("2025-01-15".to_owned());
    result.transaction_type = Some("expense".to_owned());
    result.category = Some("food".to_owned());
    result.confidence = Some(0.95);
    result
}

/// A valid unconfirmed transaction.
pub fn transaction(id: &str, image_id: &str) -> Transaction {
    Transaction {
        id: id.to_owned(),
        image_id: image_id.to_owned(),
        owner_id: "owner-1".to_owned(),
        amount: 1280.into(),
        transaction_type: TransactionType::Expense,
        date: date(2025, 1, 15),
        merchant: "Lawson".to_owned(),
        category: Category::Food,
        description: "lunch".to_owned(),
        status: TransactionStatus::Unconfirmed,
        version: 1,
        created_at: Timestamp::UNIX_EPOCH,
        updated_at: Timestamp::UNIX_EPOCH,
        expires_at: None,
        image: ImageLocation::new("receipts", format!("receipts/owner-1/{image_id}.jpg")),
        extracted_by: Some("openai:gpt-4o-mini".to_owned()),
        validation_errors: None,
    }
}

/// A pending batch job.
pub fn batch_job(id: &str, correlation_id: &str) -> BatchJob {
    BatchJob {
        id: id.to_owned(),
        correlation_id: correlation_id.to_owned(),
        owner_id: "owner-1".to_owned(),
        status: BatchJobStatus::Pending,
        counts: BatchCounts::default(),
        created_at: Timestamp::UNIX_EPOCH,
        updated_at: Timestamp::UNIX_EPOCH,
    }
}

/// One line of a batch result file whose model answered with `receipt`.
pub fn batch_line(image_id: &str, owner_id: &str, receipt: &Value) -> String {
    json!({
        "recordId": image_id,
        "imageKey": format!("uploads/{owner_id}/{image_id}.jpg"),
        "modelId": "batch-model",
        "modelOutput": { "content": [{ "text": receipt.to_string() }] },
    })
    .to_string()
}

/// One line of a batch result file whose model invocation failed.
pub fn batch_error_line(image_id: &str, owner_id: &str, message: &str) -> String {
    json!({
        "recordId": image_id,
        "imageKey": format!("uploads/{owner_id}/{image_id}.jpg"),
        "modelId": "batch-model",
        "error": { "errorCode": 400, "errorMessage": message },
    })
    .to_string()
}
