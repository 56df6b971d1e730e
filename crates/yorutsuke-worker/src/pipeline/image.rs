//! Single-image ingestion.
//!
//! Every upload moves through
//! `received -> extracted -> validated -> copied -> verified -> written -> migrated -> done`.
//! The permanent copy is verified before the conditional write, and the
//! upload is deleted only after the write succeeded or found a duplicate.
//! Any step may stop the run in a logged `skipped` state; redelivery of the
//! same event resumes safely because the identifier depends on the image
//! alone.

use jiff::Timestamp;
use jiff::tz::TimeZone;
use serde_json::{Value, json};
use strum::{Display, IntoStaticStr};
use yorutsuke_core::airlock::{self, ValidationFailure, ValidationIssue};
use yorutsuke_core::identity::IdempotencyKey;
use yorutsuke_core::types::{
    ComparisonResult, ImageLocation, ReceiptImage, Transaction, TransactionOrigin,
    TransactionStatus,
};
use yorutsuke_core::{PutOutcome, Result as CoreResult};
use yorutsuke_object::keys::UploadKey;

use crate::{TRACING_TARGET_IMAGE, WorkerState};

/// Progress of one single-image run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[derive(Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ImageStage {
    Received,
    Extracted,
    Validated,
    Copied,
    Verified,
    Written,
    Migrated,
    Done,
}

/// Outcome of one single-image run.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReport {
    /// Temporary key that triggered the run.
    pub key: String,
    /// Image identifier, once the key parsed.
    pub image_id: Option<String>,
    /// Derived transaction identifier.
    pub transaction_id: Option<String>,
    /// Last stage reached.
    pub stage: ImageStage,
    /// Set when the run stopped early.
    pub skip_reason: Option<String>,
    /// Result of the conditional write.
    pub write: Option<PutOutcome>,
    /// Status of the record built by this run.
    pub status: Option<TransactionStatus>,
    /// Whether the record built by this run is degraded.
    pub degraded: bool,
    /// Whether extraction was skipped because the record already existed.
    pub resumed: bool,
    /// Whether deleting the upload failed.
    pub cleanup_failed: bool,
}

impl ImageReport {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            image_id: None,
            transaction_id: None,
            stage: ImageStage::Received,
            skip_reason: None,
            write: None,
            status: None,
            degraded: false,
            resumed: false,
            cleanup_failed: false,
        }
    }

    /// Returns whether the run reached `done`.
    pub fn is_done(&self) -> bool {
        self.stage == ImageStage::Done
    }

    /// Returns whether the run stopped early.
    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    fn advance(&mut self, stage: ImageStage) {
        tracing::debug!(
            target: TRACING_TARGET_IMAGE,
            key = %self.key,
            stage = %stage,
            "stage reached"
        );
        self.stage = stage;
    }

    fn skip(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(
            target: TRACING_TARGET_IMAGE,
            key = %self.key,
            image_id = self.image_id.as_deref(),
            stage = %self.stage,
            reason = %reason,
            "skipped"
        );
        self.skip_reason = Some(reason);
        self
    }
}

/// Ingests one upload. Never fails; problems end up in the report.
#[tracing::instrument(name = "image.ingest", skip_all, fields(key = %key))]
pub async fn ingest_image(state: &WorkerState, key: &str) -> ImageReport {
    let mut report = ImageReport::new(key);

    let Some(upload) = UploadKey::parse(key) else {
        return report.skip("key does not follow uploads/{owner}/{file}");
    };
    let image_id = upload.image_id().to_owned();
    let id = IdempotencyKey::for_image(&image_id).into_string();
    report.image_id = Some(image_id.clone());
    report.transaction_id = Some(id.clone());

    let existing = match already_persisted(state, &id, &image_id).await {
        Ok(existing) => existing,
        Err(err) => return report.skip(format!("existence check failed: {err}")),
    };

    let transaction = if existing {
        tracing::info!(
            target: TRACING_TARGET_IMAGE,
            image_id = %image_id,
            transaction_id = %id,
            "transaction exists, resuming at copy"
        );
        report.resumed = true;
        None
    } else {
        let image = match fetch(state, &upload).await {
            Ok(image) => image,
            Err(reason) => return report.skip(reason),
        };

        let comparison = state.comparator.compare(&image).await;
        report.advance(ImageStage::Extracted);

        let transaction = build_transaction(state, &upload, &id, &comparison, Timestamp::now());
        report.status = Some(transaction.status);
        report.degraded = transaction.is_degraded();
        report.advance(ImageStage::Validated);
        Some(transaction)
    };

    let permanent = upload.permanent_key();
    if let Err(reason) = copy_to_permanent(state, &upload.key(), &permanent).await {
        return report.skip(reason);
    }
    report.advance(ImageStage::Copied);

    match state.objects.exists(&permanent).await {
        Ok(true) => report.advance(ImageStage::Verified),
        Ok(false) => return report.skip(format!("copy not visible at {permanent}")),
        Err(err) => return report.skip(format!("copy verification failed: {err}")),
    }

    let write = match &transaction {
        Some(transaction) => match state.transactions.put_if_absent(transaction).await {
            Ok(outcome) => outcome,
            Err(err) => return report.skip(format!("conditional write failed: {err}")),
        },
        None => PutOutcome::AlreadyExists,
    };
    report.write = Some(write);
    report.advance(ImageStage::Written);

    match state.objects.delete(&upload.key()).await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {}
        Err(err) => {
            tracing::warn!(
                target: TRACING_TARGET_IMAGE,
                key = %report.key,
                error = %err,
                "failed to delete upload; redelivery will retry"
            );
            report.cleanup_failed = true;
        }
    }
    report.advance(ImageStage::Migrated);
    report.advance(ImageStage::Done);

    tracing::info!(
        target: TRACING_TARGET_IMAGE,
        image_id = %image_id,
        transaction_id = %id,
        inserted = write.is_inserted(),
        status = report.status.map(TransactionStatus::as_str),
        degraded = report.degraded,
        "image ingested"
    );

    report
}

async fn already_persisted(state: &WorkerState, id: &str, image_id: &str) -> CoreResult<bool> {
    if state.transactions.exists(id).await? {
        return Ok(true);
    }
    state.transactions.exists_for_image(image_id).await
}

async fn fetch(state: &WorkerState, upload: &UploadKey) -> Result<ReceiptImage, String> {
    let object = match state.objects.get(&upload.key()).await {
        Ok(object) => object,
        Err(err) if err.is_not_found() => return Err("source image missing".to_owned()),
        Err(err) => return Err(format!("failed to fetch source image: {err}")),
    };

    let content_type = object.content_type_or_guess();
    let image = ReceiptImage::new(upload.image_id(), object.data, content_type);
    if image.is_empty() {
        return Err("source image is empty".to_owned());
    }

    Ok(image)
}

/// Copies the upload; a missing source whose copy already exists is a
/// previous delivery that got this far.
async fn copy_to_permanent(state: &WorkerState, source: &str, permanent: &str) -> Result<(), String> {
    match state.objects.copy(source, permanent).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_found() => match state.objects.exists(permanent).await {
            Ok(true) => Ok(()),
            Ok(false) => Err("source image missing and no permanent copy".to_owned()),
            Err(err) => Err(format!("copy verification failed: {err}")),
        },
        Err(err) => Err(format!("copy failed: {err}")),
    }
}

/// Builds the record to persist from a comparison.
///
/// A valid result is `needs_review` when its confidence is below the
/// threshold or the successful backends disagree on the total. A result
/// that fails validation, or no successful result at all, yields a
/// degraded record.
fn build_transaction(
    state: &WorkerState,
    upload: &UploadKey,
    id: &str,
    comparison: &ComparisonResult,
    now: Timestamp,
) -> Transaction {
    let selected = comparison.select(state.primary_backend);
    let origin = TransactionOrigin {
        image_id: upload.image_id().to_owned(),
        owner_id: upload.owner_id().to_owned(),
        image: ImageLocation::new(&state.bucket, upload.permanent_key()),
        extracted_by: selected.map(|result| result.producer()),
        expires_at: state.pipeline.expires_at(now),
    };
    let fallback_date = now.to_zoned(TimeZone::UTC).date();

    let Some(selected) = selected else {
        return Transaction::degraded(id, &all_failed(comparison), origin, fallback_date, now);
    };

    match airlock::validate(&selected.to_candidate()) {
        Ok(record) => {
            let low_confidence = selected
                .confidence
                .is_some_and(|confidence| confidence < state.pipeline.confidence_threshold);
            let disagreement = !comparison.totals_agree(state.pipeline.total_tolerance);

            let status = if low_confidence || disagreement {
                tracing::info!(
                    target: TRACING_TARGET_IMAGE,
                    image_id = %comparison.image_id,
                    low_confidence,
                    disagreement,
                    "valid record flagged for review"
                );
                TransactionStatus::NeedsReview
            } else {
                TransactionStatus::Unconfirmed
            };

            Transaction::from_valid(id, record, origin, status, now)
        }
        Err(failure) => {
            tracing::info!(
                target: TRACING_TARGET_IMAGE,
                image_id = %comparison.image_id,
                issues = failure.issues.len(),
                "extraction failed validation; persisting degraded record"
            );
            Transaction::degraded(id, &failure, origin, fallback_date, now)
        }
    }
}

fn all_failed(comparison: &ComparisonResult) -> ValidationFailure {
    let failures: Vec<Value> = comparison
        .failures()
        .into_iter()
        .map(|(backend, error)| json!({ "backend": backend, "error": error }))
        .collect();

    ValidationFailure::single(
        ValidationIssue::new(
            "payload",
            "extraction_failed",
            format!("no backend produced a result ({} failed)", failures.len()),
        ),
        json!({ "failures": failures }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use object_store::memory::InMemory;
    use yorutsuke_core::ExtractionBackend;
    use yorutsuke_core::types::{BackendKind, ExtractionResult};
    use yorutsuke_inference::Comparator;
    use yorutsuke_object::ObjectStoreClient;
    use yorutsuke_test::{MemoryStore, fixtures};

    use super::*;
    use crate::PipelineConfig;

    fn state() -> WorkerState {
        let store = Arc::new(MemoryStore::new());
        let backends: Vec<Arc<dyn ExtractionBackend>> = Vec::new();
        WorkerState::new(
            store.clone(),
            store,
            ObjectStoreClient::new(InMemory::new()),
            "bucket",
            Comparator::new(backends),
        )
    }

    fn upload() -> UploadKey {
        UploadKey::parse("uploads/owner-1/img-1.jpg").unwrap()
    }

    fn build(state: &WorkerState, results: Vec<ExtractionResult>) -> Transaction {
        let comparison = ComparisonResult::from_results("img-1", results);
        build_transaction(state, &upload(), "tx_1", &comparison, Timestamp::UNIX_EPOCH)
    }

    #[test]
    fn confident_agreeing_result_is_unconfirmed() {
        let tx = build(
            &state(),
            vec![
                fixtures::extraction(BackendKind::OpenAi, 1280.0),
                fixtures::extraction(BackendKind::Gemini, 1280.0),
            ],
        );

        assert_eq!(tx.status, TransactionStatus::Unconfirmed);
        assert_eq!(tx.image.key, "receipts/owner-1/img-1.jpg");
        assert_eq!(tx.image.bucket, "bucket");
        assert_eq!(tx.extracted_by.as_deref(), Some("openai:openai-model"));
        assert!(!tx.is_degraded());
    }

    #[test]
    fn primary_backend_is_preferred() {
        let state = state().with_primary_backend(BackendKind::Gemini);
        let tx = build(
            &state,
            vec![
                fixtures::extraction(BackendKind::OpenAi, 1280.0),
                fixtures::extraction(BackendKind::Gemini, 1280.0),
            ],
        );
        assert_eq!(tx.extracted_by.as_deref(), Some("gemini:gemini-model"));
    }

    #[test]
    fn disagreement_or_low_confidence_needs_review() {
        let tx = build(
            &state(),
            vec![
                fixtures::extraction(BackendKind::OpenAi, 1280.0),
                fixtures::extraction(BackendKind::Azure, 12800.0),
            ],
        );
        assert_eq!(tx.status, TransactionStatus::NeedsReview);
        assert!(!tx.is_degraded());

        let mut unsure = fixtures::extraction(BackendKind::OpenAi, 1280.0);
        unsure.confidence = Some(0.2);
        let tx = build(&state(), vec![unsure]);
        assert_eq!(tx.status, TransactionStatus::NeedsReview);
        assert!(!tx.is_degraded());
    }

    #[test]
    fn all_failed_is_degraded() {
        let tx = build(
            &state(),
            vec![
                ExtractionResult::failed(BackendKind::OpenAi, "m", "timeout"),
                ExtractionResult::failed(BackendKind::Ollama, "m", "refused"),
            ],
        );

        assert_eq!(tx.status, TransactionStatus::NeedsReview);
        assert_eq!(tx.merchant, "unknown");
        assert_eq!(tx.extracted_by, None);
        let errors = tx.validation_errors.unwrap();
        assert_eq!(errors["issues"][0]["code"], "extraction_failed");
        assert_eq!(errors["raw"]["failures"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn invalid_result_is_degraded_with_issues() {
        let mut result = fixtures::extraction(BackendKind::OpenAi, 1280.0);
        result.category = Some("groceries".into());

        let tx = build(&state(), vec![result]);
        assert!(tx.is_degraded());
        assert_eq!(tx.status, TransactionStatus::NeedsReview);
        assert_eq!(tx.merchant, "Lawson");
        assert_eq!(tx.category.as_str(), "other");
    }

    #[test]
    fn ttl_sets_expiry() {
        let state = state().with_pipeline(PipelineConfig::default().with_ttl_days(1));
        let tx = build(&state, vec![fixtures::extraction(BackendKind::OpenAi, 1.0)]);
        assert_eq!(tx.expires_at.unwrap().as_second(), 86_400);
    }
}
