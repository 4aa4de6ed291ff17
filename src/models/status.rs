//! Engine status snapshot.

use serde::Serialize;
use std::fmt;

/// Point-in-time counters exposed by the status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Origin the engine's history is scoped to.
    pub scope: String,
    /// Distinct canonical URLs held in the exact URL store.
    pub url_keys: usize,
    /// Distinct digests held in the exact hash store.
    pub digests: usize,
    /// Fraction of Bloom filter bits set.
    pub fill_ratio: f64,
    /// Bloom filter size in bits.
    pub bloom_bits: u64,
    /// Number of hash positions per key.
    pub bloom_hashes: u32,
    /// Commits made in this session.
    pub session_commits: u64,
    /// Whether flushes still reach durable storage.
    pub durable: bool,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scope: {}", self.scope)?;
        writeln!(f, "  URL keys:      {}", self.url_keys)?;
        writeln!(f, "  Digests:       {}", self.digests)?;
        writeln!(
            f,
            "  Bloom filter:  {} bits, k={}, {:.4}% full",
            self.bloom_bits,
            self.bloom_hashes,
            self.fill_ratio * 100.0
        )?;
        writeln!(f, "  Commits:       {}", self.session_commits)?;
        write!(
            f,
            "  Durable:       {}",
            if self.durable { "yes" } else { "no (in-memory only)" }
        )
    }
}
