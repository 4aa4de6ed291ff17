//! Identity types used by the deduplication engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix marking a digest produced by the length+time fallback.
const WEAK_DIGEST_PREFIX: &str = "weak:";

/// Normalized identity of a resource location.
///
/// Produced by [`crate::services::deduplication::UrlCanonicalizer`]. Two raw
/// URLs that differ only in volatile parameters, parameter order, insecure
/// scheme, default port, or a trailing slash share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Wraps an already-canonical string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CanonicalKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Hex-encoded content digest of fetched bytes.
///
/// Strong digests are 64 lowercase hex characters (SHA-256). Weak digests
/// (`weak:<len>:<unix-millis>`) only exist when the hashing primitive failed
/// and the fallback was permitted; they identify nothing beyond one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Wraps a hex digest.
    #[must_use]
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Builds the fallback identity from payload length and a timestamp.
    #[must_use]
    pub fn weak(len: usize, unix_millis: i64) -> Self {
        Self(format!("{WEAK_DIGEST_PREFIX}{len}:{unix_millis}"))
    }

    /// Returns true for fallback digests.
    #[must_use]
    pub fn is_weak(&self) -> bool {
        self.0.starts_with(WEAK_DIGEST_PREFIX)
    }

    /// Returns the digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        if self.is_weak() {
            return &self.0;
        }
        let len = self.0.len().min(12);
        &self.0[..len]
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key_display() {
        let key = CanonicalKey::new("https://a.com/x.jpg");
        assert_eq!(key.to_string(), "https://a.com/x.jpg");
        assert_eq!(key.as_str(), "https://a.com/x.jpg");
    }

    #[test]
    fn test_weak_digest_is_flagged() {
        let weak = ContentDigest::weak(2048, 1_700_000_000_000);
        assert!(weak.is_weak());
        assert_eq!(weak.as_str(), "weak:2048:1700000000000");

        let strong = ContentDigest::new("ab".repeat(32));
        assert!(!strong.is_weak());
        assert_eq!(strong.short().len(), 12);
    }

    #[test]
    fn test_digest_serializes_transparently() {
        let digest = ContentDigest::new("deadbeef");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, "\"deadbeef\"");
    }
}
