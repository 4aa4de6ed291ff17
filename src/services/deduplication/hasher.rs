//! Content hashing for the content dedup tier.
//!
//! Payloads are hashed with SHA-256 and hex-encoded. The primitive sits
//! behind [`DigestPrimitive`] so a failing implementation can be swapped in.

use crate::models::ContentDigest;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::instrument;

/// A hashing primitive producing a hex digest.
pub trait DigestPrimitive: Send + Sync {
    /// Short algorithm name for logs.
    fn name(&self) -> &'static str;

    /// Hashes the full byte sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the primitive is unavailable.
    fn digest(&self, bytes: &[u8]) -> Result<String>;
}

/// SHA-256 via `sha2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl DigestPrimitive for Sha256Digest {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn digest(&self, bytes: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Computes [`ContentDigest`]s of fetched payloads.
///
/// # Failure handling
///
/// When the primitive fails and `weak_fallback` is set, the hasher returns a
/// weak digest built from payload length and the current time. That identity
/// matches nothing, so it defeats content dedup for that payload; the event
/// is logged at WARN and counted in `dedup_weak_digest_total`. With
/// `weak_fallback` unset the failure is returned to the caller.
///
/// # Example
///
/// ```rust
/// use imgdedup::services::deduplication::ContentHasher;
///
/// let hasher = ContentHasher::default();
/// let digest = hasher.hash_bytes(b"\x89PNG").unwrap();
/// assert_eq!(digest.as_str().len(), 64);
/// ```
#[derive(Clone)]
pub struct ContentHasher {
    primitive: Arc<dyn DigestPrimitive>,
    weak_fallback: bool,
}

impl std::fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHasher")
            .field("primitive", &self.primitive.name())
            .field("weak_fallback", &self.weak_fallback)
            .finish()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(Arc::new(Sha256Digest), true)
    }
}

impl ContentHasher {
    /// Creates a hasher over `primitive`.
    #[must_use]
    pub fn new(primitive: Arc<dyn DigestPrimitive>, weak_fallback: bool) -> Self {
        Self {
            primitive,
            weak_fallback,
        }
    }

    /// Returns true when primitive failures degrade to weak digests.
    #[must_use]
    pub const fn weak_fallback(&self) -> bool {
        self.weak_fallback
    }

    /// Hashes `bytes` on the current thread.
    ///
    /// # Errors
    ///
    /// Returns the primitive's error when it fails and weak fallback is off.
    pub fn hash_bytes(&self, bytes: &[u8]) -> Result<ContentDigest> {
        digest_with_fallback(self.primitive.as_ref(), self.weak_fallback, bytes)
    }

    /// Hashes `payload` on the blocking pool and hands the bytes back.
    ///
    /// The payload is moved into the worker to avoid a copy. If the worker
    /// itself dies the bytes are lost and an error is returned regardless of
    /// the fallback setting.
    #[instrument(skip(self, payload), fields(size = payload.len(), primitive = self.primitive.name()))]
    pub async fn hash(&self, payload: Vec<u8>) -> (Vec<u8>, Result<ContentDigest>) {
        let primitive = Arc::clone(&self.primitive);
        let weak_fallback = self.weak_fallback;

        let joined = tokio::task::spawn_blocking(move || {
            let digest = digest_with_fallback(primitive.as_ref(), weak_fallback, &payload);
            (payload, digest)
        })
        .await;

        joined.unwrap_or_else(|e| {
            (
                Vec::new(),
                Err(Error::OperationFailed {
                    operation: "hash_payload".to_string(),
                    cause: e.to_string(),
                }),
            )
        })
    }
}

fn digest_with_fallback(
    primitive: &dyn DigestPrimitive,
    weak_fallback: bool,
    bytes: &[u8],
) -> Result<ContentDigest> {
    match primitive.digest(bytes) {
        Ok(hex) => Ok(ContentDigest::new(hex)),
        Err(e) if weak_fallback => {
            let digest = ContentDigest::weak(bytes.len(), chrono::Utc::now().timestamp_millis());
            tracing::warn!(
                primitive = primitive.name(),
                error = %e,
                digest = %digest,
                "Digest primitive failed, using weak length+time identity; content dedup is off for this payload"
            );
            metrics::counter!("dedup_weak_digest_total").increment(1);
            Ok(digest)
        },
        Err(e) => Err(e),
    }
}
