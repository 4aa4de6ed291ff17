//! Pipeline stages and per-candidate outcomes.

use super::{CanonicalKey, ContentDigest};
use serde::Serialize;
use std::fmt;
use thiserror::Error as ThisError;

/// Stage of the per-candidate decision pipeline.
///
/// ```text
/// Discovered → UrlChecked → { SkippedUrlDuplicate | Fetching }
/// Fetching → Fetched → HashChecked
/// HashChecked → { SkippedHashDuplicate | SkippedSizeFilter | Committed | Failed }
/// ```
///
/// `Failed` is also reachable from `Fetching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStage {
    /// Raw URL received.
    Discovered,
    /// Canonical key computed and checked against the exact URL store.
    UrlChecked,
    /// Waiting on the fetch collaborator.
    Fetching,
    /// Bytes in hand.
    Fetched,
    /// Digest computed and checked against the filter and hash store.
    HashChecked,
    /// Canonical key already committed.
    SkippedUrlDuplicate,
    /// Identical bytes already committed under another URL.
    SkippedHashDuplicate,
    /// Payload smaller than the configured minimum.
    SkippedSizeFilter,
    /// Recorded as new; the caller may save the payload.
    Committed,
    /// Fetch or hash failed.
    Failed,
}

impl DedupStage {
    /// Returns true for stages that end the pipeline.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::SkippedUrlDuplicate
                | Self::SkippedHashDuplicate
                | Self::SkippedSizeFilter
                | Self::Committed
                | Self::Failed
        )
    }

    /// Returns the stage name as a static string (used as a metrics label).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::UrlChecked => "url_checked",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::HashChecked => "hash_checked",
            Self::SkippedUrlDuplicate => "skipped_url_duplicate",
            Self::SkippedHashDuplicate => "skipped_hash_duplicate",
            Self::SkippedSizeFilter => "skipped_size_filter",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DedupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq, ThisError, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    /// Connection, TLS, or body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status.
    #[error("http status {0}")]
    Status(u16),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The locator cannot be fetched at all.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Why a candidate ended in [`DedupStage::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    /// The fetch collaborator returned an error.
    Fetch(FetchError),
    /// The digest primitive failed and weak fallback is disabled.
    Hash(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "fetch failed: {e}"),
            Self::Hash(cause) => write!(f, "hash failed: {cause}"),
        }
    }
}

/// Terminal outcome of one candidate.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DedupOutcome {
    /// Canonical key was already committed; nothing fetched.
    SkippedUrlDuplicate,

    /// Bytes match previously committed content.
    SkippedHashDuplicate {
        /// Digest of the duplicate bytes.
        digest: ContentDigest,
    },

    /// Payload below the minimum size.
    SkippedSizeFilter {
        /// Digest of the discarded bytes.
        digest: ContentDigest,
        /// Payload length in bytes.
        size: usize,
    },

    /// New content, recorded in every store.
    Committed {
        /// Digest recorded for the payload.
        digest: ContentDigest,
        /// Payload length in bytes.
        size: usize,
        /// The fetched bytes, handed back for the download trigger.
        #[serde(skip)]
        payload: Vec<u8>,
    },

    /// Fetch or hash failure; nothing recorded.
    Failed {
        /// What went wrong.
        failure: FailureKind,
    },
}

impl DedupOutcome {
    /// Terminal stage corresponding to this outcome.
    #[must_use]
    pub const fn stage(&self) -> DedupStage {
        match self {
            Self::SkippedUrlDuplicate => DedupStage::SkippedUrlDuplicate,
            Self::SkippedHashDuplicate { .. } => DedupStage::SkippedHashDuplicate,
            Self::SkippedSizeFilter { .. } => DedupStage::SkippedSizeFilter,
            Self::Committed { .. } => DedupStage::Committed,
            Self::Failed { .. } => DedupStage::Failed,
        }
    }
}

/// Result of running one candidate through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct DedupRecord {
    /// Locator as received (and as fetched).
    pub raw_url: String,
    /// Identity used by the URL tier.
    pub key: CanonicalKey,
    /// Terminal outcome.
    #[serde(flatten)]
    pub outcome: DedupOutcome,
    /// Wall time spent in the pipeline.
    pub duration_ms: u64,
}

impl DedupRecord {
    /// Terminal stage reached.
    #[must_use]
    pub const fn stage(&self) -> DedupStage {
        self.outcome.stage()
    }

    /// Returns true when the candidate was committed.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self.outcome, DedupOutcome::Committed { .. })
    }

    /// Takes the committed payload, leaving an empty buffer behind.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        match &mut self.outcome {
            DedupOutcome::Committed { payload, .. } => Some(std::mem::take(payload)),
            _ => None,
        }
    }
}
