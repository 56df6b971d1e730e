//! Deterministic transaction identifiers.
//!
//! An [`IdempotencyKey`] is derived only from stable inputs: the image
//! identifier for the single-image path, or the job and image identifiers
//! for the batch path. Redelivered events therefore always map to the same
//! key.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::TRACING_TARGET_IDENTITY;

/// Prefix of every rendered key.
pub const KEY_PREFIX: &str = "tx_";

/// Number of digest bytes kept in the rendered key.
const DIGEST_BYTES: usize = 16;

/// Domain tags keep the two derivations from colliding.
const DOMAIN_IMAGE: &[u8] = b"yorutsuke/image";
const DOMAIN_BATCH: &[u8] = b"yorutsuke/batch";

/// A transaction identifier derived from stable inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize, Display)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives the key for an image on the single-image path.
    pub fn for_image(image_id: &str) -> Self {
        Self::derive(DOMAIN_IMAGE, &[image_id])
    }

    /// Derives the key for a record on the batch path.
    pub fn for_batch_record(job_id: &str, image_id: &str) -> Self {
        Self::derive(DOMAIN_BATCH, &[job_id, image_id])
    }

    /// Returns the rendered key.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key and returns the rendered string.
    #[inline]
    pub fn into_string(self) -> String {
        self.0
    }

    fn derive(domain: &[u8], parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }

        let digest = hasher.finalize();
        let key = format!("{KEY_PREFIX}{}", hex::encode(&digest[..DIGEST_BYTES]));

        tracing::trace!(
            target: TRACING_TARGET_IDENTITY,
            key = %key,
            parts = parts.len(),
            "derived idempotency key"
        );

        Self(key)
    }
}

impl AsRef<str> for IdempotencyKey {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_key() {
        assert_eq!(
            IdempotencyKey::for_image("img-1"),
            IdempotencyKey::for_image("img-1")
        );
        assert_eq!(
            IdempotencyKey::for_batch_record("job-1", "img-1"),
            IdempotencyKey::for_batch_record("job-1", "img-1")
        );
    }

    #[test]
    fn key_shape() {
        let key = IdempotencyKey::for_image("img-1");
        assert!(key.as_str().starts_with(KEY_PREFIX));
        assert_eq!(key.as_str().len(), KEY_PREFIX.len() + 32);
        assert!(key.as_str()[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn inputs_are_separated() {
        assert_ne!(
            IdempotencyKey::for_batch_record("ab", "c"),
            IdempotencyKey::for_batch_record("a", "bc")
        );
        assert_ne!(
            IdempotencyKey::for_image("img-1"),
            IdempotencyKey::for_batch_record("", "img-1")
        );
        assert_ne!(
            IdempotencyKey::for_batch_record("job-1", "img-1"),
            IdempotencyKey::for_batch_record("job-2", "img-1")
        );
    }
}
