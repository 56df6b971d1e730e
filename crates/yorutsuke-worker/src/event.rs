//! Object-created notifications and routing by key prefix.
//!
//! Notifications follow the S3 event shape:
//!
//! ```json
//! { "Records": [ { "s3": { "bucket": { "name": "b" }, "object": { "key": "uploads/o/f.jpg" } } } ] }
//! ```
//!
//! Keys arrive URL-encoded with `+` for spaces and are decoded before
//! routing.

use std::borrow::Cow;

use serde::Deserialize;
use yorutsuke_object::keys::{BATCH_OUTPUT_PREFIX, BatchOutputKey, UPLOADS_PREFIX};

use crate::pipeline::{BatchReport, ImageReport, ingest_batch, ingest_image};
use crate::{Result, TRACING_TARGET_EVENT, WorkerState};

/// One object-created record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreated {
    /// Bucket the object was written to.
    pub bucket: String,
    /// Decoded object key.
    pub key: String,
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    #[serde(default)]
    s3: Option<S3Entity>,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Parses a notification body into object-created records.
///
/// Records without an `s3` section are dropped.
///
/// # Errors
///
/// Returns [`WorkerError::InvalidEvent`] when the body is not a notification.
///
/// [`WorkerError::InvalidEvent`]: crate::WorkerError::InvalidEvent
pub fn parse_notification(body: &str) -> Result<Vec<ObjectCreated>> {
    let notification: Notification = serde_json::from_str(body)?;

    let events: Vec<ObjectCreated> = notification
        .records
        .into_iter()
        .filter_map(|record| record.s3)
        .map(|s3| ObjectCreated {
            bucket: s3.bucket.name,
            key: decode_key(&s3.object.key).into_owned(),
        })
        .collect();

    tracing::debug!(target: TRACING_TARGET_EVENT, records = events.len(), "parsed notification");
    Ok(events)
}

/// Decodes an event key: `+` becomes a space, then percent-escapes are
/// resolved. Keys that do not decode as UTF-8 are returned unchanged.
pub fn decode_key(raw: &str) -> Cow<'_, str> {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => Cow::Owned(decoded.into_owned()),
        Err(_) => Cow::Borrowed(raw),
    }
}

/// Pipeline an object key is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A temporary upload for the single-image path.
    Image(String),
    /// A result file for the batch path.
    Batch(BatchOutputKey),
    /// Nothing to do.
    Ignored(&'static str),
}

impl Trigger {
    /// Routes a decoded key by prefix.
    pub fn classify(key: &str) -> Self {
        if key.starts_with(UPLOADS_PREFIX) {
            return Self::Image(key.to_owned());
        }

        if key.starts_with(BATCH_OUTPUT_PREFIX) {
            return match BatchOutputKey::parse(key) {
                Some(output) if output.is_result_file() => Self::Batch(output),
                Some(_) => Self::Ignored("not a result file"),
                None => Self::Ignored("malformed batch output key"),
            };
        }

        Self::Ignored("unrouted prefix")
    }
}

/// Result of handling one object-created record.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The single-image pipeline ran.
    Image(ImageReport),
    /// The batch pipeline ran.
    Batch(BatchReport),
    /// The record was not routed anywhere.
    Ignored {
        /// Decoded object key.
        key: String,
        /// Why nothing ran.
        reason: &'static str,
    },
}

/// Runs the pipeline for every record, one after another.
///
/// Records from a bucket other than the configured one are ignored.
pub async fn dispatch(state: &WorkerState, events: &[ObjectCreated]) -> Vec<DispatchOutcome> {
    let mut outcomes = Vec::with_capacity(events.len());

    for event in events {
        let trigger = if event.bucket == state.bucket {
            Trigger::classify(&event.key)
        } else {
            Trigger::Ignored("foreign bucket")
        };

        let outcome = match trigger {
            Trigger::Image(key) => DispatchOutcome::Image(ingest_image(state, &key).await),
            Trigger::Batch(output) => DispatchOutcome::Batch(ingest_batch(state, &output).await),
            Trigger::Ignored(reason) => {
                tracing::debug!(
                    target: TRACING_TARGET_EVENT,
                    bucket = %event.bucket,
                    key = %event.key,
                    reason,
                    "ignoring object event"
                );
                DispatchOutcome::Ignored {
                    key: event.key.clone(),
                    reason,
                }
            }
        };

        outcomes.push(outcome);
    }

    outcomes
}
