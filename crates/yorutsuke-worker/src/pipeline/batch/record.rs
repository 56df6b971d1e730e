//! Records of a batch result file.

use jiff::Timestamp;
use jiff::civil::Date;
use serde::Deserialize;
use serde_json::Value;
use yorutsuke_core::airlock::{self, ValidationFailure, ValidationIssue};
use yorutsuke_core::identity::IdempotencyKey;
use yorutsuke_core::types::{ImageLocation, Transaction, TransactionOrigin, TransactionStatus};
use yorutsuke_inference::prompt::strip_code_fences;
use yorutsuke_object::keys::UploadKey;

/// One line of a result file.
///
/// `modelOutput` and `error` are each optional; a record carrying an error
/// is persisted in degraded form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    /// Image identifier as submitted; expected to match the image key stem.
    #[serde(default)]
    pub record_id: Option<String>,
    /// Temporary key of the source image.
    pub image_key: String,
    /// Model that produced the output.
    #[serde(default)]
    pub model_id: Option<String>,
    /// Model answer.
    #[serde(default)]
    pub model_output: Option<ModelOutput>,
    /// Model invocation failure.
    #[serde(default)]
    pub error: Option<ModelError>,
}

/// Model answer split into content blocks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelOutput {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// A content block; only text blocks carry receipt data.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub text: Option<String>,
}

/// Failure reported for one record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelError {
    /// Provider error code; a number or a string.
    #[serde(default)]
    pub error_code: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// A record that could not become a transaction at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InvalidRecord {
    /// The image key does not follow `uploads/{owner}/{file}`.
    ImageKey(String),
}

/// A transaction ready to be written, with the upload it came from.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub transaction: Transaction,
    pub upload: UploadKey,
    /// The submitted record id names a different image than the key.
    pub record_id_mismatch: bool,
}

/// Inputs shared by every record of one result file.
#[derive(Debug, Clone)]
pub(crate) struct RecordContext<'a> {
    pub job_id: &'a str,
    pub bucket: &'a str,
    pub now: Timestamp,
    pub fallback_date: Date,
    pub expires_at: Option<Timestamp>,
}

impl BatchRecord {
    /// Parses one line.
    pub fn parse(line: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(line)
    }

    /// Returns the concatenated text blocks of the model answer.
    pub fn output_text(&self) -> Option<String> {
        let output = self.model_output.as_ref()?;
        let text: String = output
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }

    /// Returns the untrusted payload to validate, or the failure that makes
    /// the record degraded before validation.
    fn payload(&self) -> Result<Value, ValidationFailure> {
        if let Some(error) = &self.error {
            let message = error
                .error_message
                .clone()
                .unwrap_or_else(|| "model invocation failed".to_owned());
            return Err(ValidationFailure::single(
                ValidationIssue::new("payload", "model_error", message),
                serde_json::json!({
                    "errorCode": error.error_code,
                    "errorMessage": error.error_message,
                }),
            ));
        }

        let Some(text) = self.output_text() else {
            return Err(ValidationFailure::single(
                ValidationIssue::new("payload", "missing_output", "record has no model output"),
                Value::Null,
            ));
        };

        serde_json::from_str(strip_code_fences(&text)).map_err(|err| {
            ValidationFailure::single(
                ValidationIssue::new("payload", "invalid_json", err.to_string()),
                Value::String(text.clone()),
            )
        })
    }

    /// Turns the record into a transaction candidate.
    ///
    /// The identifier depends only on the job and image identifiers.
    pub(crate) fn into_candidate(self, ctx: &RecordContext<'_>) -> Result<Candidate, InvalidRecord> {
        let Some(upload) = UploadKey::parse(&self.image_key) else {
            return Err(InvalidRecord::ImageKey(self.image_key));
        };

        let record_id_mismatch = self
            .record_id
            .as_deref()
            .is_some_and(|record_id| record_id != upload.image_id());

        let id = IdempotencyKey::for_batch_record(ctx.job_id, upload.image_id());
        let origin = TransactionOrigin {
            image_id: upload.image_id().to_owned(),
            owner_id: upload.owner_id().to_owned(),
            image: ImageLocation::new(ctx.bucket, upload.key()),
            extracted_by: self.model_id.as_ref().map(|model| format!("batch:{model}")),
            expires_at: ctx.expires_at,
        };

        let validated = self
            .payload()
            .and_then(|payload| airlock::validate(&payload));

        let mut transaction = match validated {
            Ok(record) => Transaction::from_valid(
                id,
                record,
                origin,
                TransactionStatus::Unconfirmed,
                ctx.now,
            ),
            Err(failure) => Transaction::degraded(id, &failure, origin, ctx.fallback_date, ctx.now),
        };
        transaction.image.key = upload.dated_key(transaction.date);

        Ok(Candidate {
            transaction,
            upload,
            record_id_mismatch,
        })
    }
}
