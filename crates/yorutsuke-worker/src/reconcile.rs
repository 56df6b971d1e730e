//! Reconciliation sweep over permanent receipts.
//!
//! A crash between the verified copy and the conditional write leaves a
//! permanent image without a transaction. Redelivery normally repairs
//! this; the sweep reports whatever redelivery missed. It never deletes or
//! writes anything.

use futures::TryStreamExt;
use yorutsuke_object::keys::{RECEIPTS_PREFIX, ReceiptKey};

use crate::{Result, TRACING_TARGET_RECONCILE, WorkerState};

/// A permanent receipt with no transaction for its image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    /// Object key.
    pub key: String,
    /// Image identifier.
    pub image_id: String,
    /// Owner segment of the key.
    pub owner_id: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Objects listed.
    pub scanned: u64,
    /// Objects whose key is not a receipt key.
    pub unrecognized: u64,
    /// Lookups that failed; those objects are neither orphan nor matched.
    pub lookup_errors: u64,
    /// Receipts without a transaction.
    pub orphans: Vec<Orphan>,
}

/// Receipts looked up per store round trip.
const LOOKUP_BATCH_SIZE: usize = 100;

/// Lists every object under `receipts/` and reports orphans.
///
/// # Errors
///
/// Returns an error if listing fails.
#[tracing::instrument(name = "reconcile.sweep", skip_all)]
pub async fn reconcile(state: &WorkerState) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let mut objects = state.objects.list_stream(RECEIPTS_PREFIX);
    let mut pending: Vec<(String, ReceiptKey)> = Vec::with_capacity(LOOKUP_BATCH_SIZE);

    while let Some(meta) = objects.try_next().await? {
        report.scanned += 1;
        let key = meta.location.to_string();

        let Some(receipt) = ReceiptKey::parse(&key) else {
            tracing::debug!(target: TRACING_TARGET_RECONCILE, key = %key, "unrecognized receipt key");
            report.unrecognized += 1;
            continue;
        };

        pending.push((key, receipt));
        if pending.len() >= LOOKUP_BATCH_SIZE {
            let batch = std::mem::replace(&mut pending, Vec::with_capacity(LOOKUP_BATCH_SIZE));
            resolve(state, batch, &mut report).await;
        }
    }

    if !pending.is_empty() {
        resolve(state, pending, &mut report).await;
    }

    tracing::info!(
        target: TRACING_TARGET_RECONCILE,
        scanned = report.scanned,
        orphans = report.orphans.len(),
        unrecognized = report.unrecognized,
        lookup_errors = report.lookup_errors,
        "reconciliation finished"
    );

    Ok(report)
}

/// Looks up one batch of receipts and records those without a transaction.
async fn resolve(state: &WorkerState, batch: Vec<(String, ReceiptKey)>, report: &mut ReconcileReport) {
    let image_ids = batch
        .iter()
        .map(|(_, receipt)| receipt.image_id().to_owned())
        .collect();

    let existing = match state.transactions.existing_image_ids(image_ids).await {
        Ok(existing) => existing,
        Err(err) => {
            tracing::error!(
                target: TRACING_TARGET_RECONCILE,
                receipts = batch.len(),
                error = %err,
                "transaction lookup failed"
            );
            report.lookup_errors += batch.len() as u64;
            return;
        }
    };

    for (key, receipt) in batch {
        if existing.contains(receipt.image_id()) {
            continue;
        }

        tracing::warn!(
            target: TRACING_TARGET_RECONCILE,
            key = %key,
            image_id = %receipt.image_id(),
            "receipt has no transaction"
        );
        report.orphans.push(Orphan {
            image_id: receipt.image_id().to_owned(),
            owner_id: receipt.owner_id().to_owned(),
            key,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use object_store::memory::InMemory;
    use yorutsuke_core::ExtractionBackend;
    use yorutsuke_inference::Comparator;
    use yorutsuke_object::ObjectStoreClient;
    use yorutsuke_test::{MemoryStore, fixtures};

    use super::*;

    #[tokio::test]
    async fn reports_receipts_without_transactions() {
        let store = Arc::new(MemoryStore::new());
        store.seed(fixtures::transaction("tx_1", "img-1"));
        store.seed(fixtures::transaction("tx_2", "img-2"));

        let objects = ObjectStoreClient::new(InMemory::new());
        for key in [
            "receipts/owner-1/img-1.jpg",
            "receipts/2025/01/15/owner-1/img-2.jpg",
            "receipts/owner-1/img-3.jpg",
            "receipts/stray.txt",
            "uploads/owner-1/img-4.jpg",
        ] {
            objects.put(key, Bytes::from_static(b"x"), None).await.unwrap();
        }

        let backends: Vec<Arc<dyn ExtractionBackend>> = Vec::new();
        let state = WorkerState::new(
            store.clone(),
            store.clone(),
            objects,
            "bucket",
            Comparator::new(backends),
        );

        let report = reconcile(&state).await.unwrap();

        assert_eq!(report.scanned, 4);
        assert_eq!(report.unrecognized, 1);
        assert_eq!(
            report.orphans,
            vec![Orphan {
                key: "receipts/owner-1/img-3.jpg".into(),
                image_id: "img-3".into(),
                owner_id: "owner-1".into(),
            }]
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn lookups_span_several_batches() {
        let store = Arc::new(MemoryStore::new());
        let objects = ObjectStoreClient::new(InMemory::new());
        let total = LOOKUP_BATCH_SIZE * 2 + 5;
        for i in 0..total {
            if i % 50 != 0 {
                store.seed(fixtures::transaction(&format!("tx_{i}"), &format!("img-{i}")));
            }
            objects
                .put(&format!("receipts/owner-1/img-{i}.jpg"), Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }

        let backends: Vec<Arc<dyn ExtractionBackend>> = Vec::new();
        let state = WorkerState::new(
            store.clone(),
            store.clone(),
            objects,
            "bucket",
            Comparator::new(backends),
        );

        let report = reconcile(&state).await.unwrap();

        assert_eq!(report.scanned, total as u64);
        assert_eq!(report.lookup_errors, 0);
        let mut orphans: Vec<String> = report.orphans.into_iter().map(|o| o.image_id).collect();
        orphans.sort();
        assert_eq!(orphans, vec!["img-0", "img-100", "img-150", "img-200", "img-50"]);
    }
}
