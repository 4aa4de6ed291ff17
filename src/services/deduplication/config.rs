//! Deduplication engine configuration.

use super::canonical::{DEFAULT_VOLATILE_PARAMS, DEFAULT_VOLATILE_PREFIXES};
use super::exact_store::DEFAULT_PERSIST_WINDOW;
use std::time::Duration;

/// Default Bloom filter design capacity.
pub const DEFAULT_BLOOM_EXPECTED_ELEMENTS: u64 = 10_000;

/// Default Bloom filter false-positive target.
pub const DEFAULT_BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Default number of commits between persistence flushes.
pub const DEFAULT_PERSIST_FLUSH_INTERVAL: u32 = 25;

/// Default pause between candidates in a batch.
pub const DEFAULT_INTER_ITEM_DELAY: Duration = Duration::from_millis(200);

/// Configuration for the deduplication engine.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `IMGDEDUP_SIZE_FILTER` | bool | `false` | Enable the minimum size filter |
/// | `IMGDEDUP_MIN_SIZE_KB` | u64 | `10` | Minimum payload size in KiB |
/// | `IMGDEDUP_FLUSH_INTERVAL` | u32 | `25` | Commits between flushes (0 = shutdown only) |
/// | `IMGDEDUP_BLOOM_EXPECTED` | u64 | `10000` | Bloom design capacity |
/// | `IMGDEDUP_BLOOM_FP_RATE` | f64 | `0.01` | Bloom false-positive target |
/// | `IMGDEDUP_PERSIST_WINDOW` | usize | `1000` | Exact keys persisted per store |
/// | `IMGDEDUP_DELAY_MS` | u64 | `200` | Pause between candidates |
/// | `IMGDEDUP_WEAK_DIGEST_FALLBACK` | bool | `true` | Degrade hash failures to weak digests |
///
/// # Example
///
/// ```rust
/// use imgdedup::services::deduplication::DeduplicationConfig;
///
/// let config = DeduplicationConfig::default()
///     .with_size_filter(true)
///     .with_min_size_kb(100);
/// assert_eq!(config.min_size_bytes(), 102_400);
/// assert_eq!(config.persist_flush_interval, 25);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeduplicationConfig {
    /// Skip payloads smaller than `min_size_kb`.
    pub size_filter_enabled: bool,

    /// Minimum payload size in KiB when the size filter is on.
    pub min_size_kb: u64,

    /// Commits between persistence flushes. Zero flushes only on shutdown.
    pub persist_flush_interval: u32,

    /// Bloom filter design capacity `n`.
    pub bloom_expected_elements: u64,

    /// Bloom filter false-positive target `p`.
    pub bloom_false_positive_rate: f64,

    /// Number of most recent exact keys persisted per store.
    pub persist_window: usize,

    /// Pause between candidates in a batch.
    pub inter_item_delay: Duration,

    /// Degrade digest-primitive failures to weak digests instead of failing.
    pub weak_digest_fallback: bool,

    /// Query parameter names dropped during canonicalization.
    pub volatile_params: Vec<String>,

    /// Query parameter name prefixes dropped during canonicalization.
    pub volatile_prefixes: Vec<String>,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            size_filter_enabled: false,
            min_size_kb: 10,
            persist_flush_interval: DEFAULT_PERSIST_FLUSH_INTERVAL,
            bloom_expected_elements: DEFAULT_BLOOM_EXPECTED_ELEMENTS,
            bloom_false_positive_rate: DEFAULT_BLOOM_FALSE_POSITIVE_RATE,
            persist_window: DEFAULT_PERSIST_WINDOW,
            inter_item_delay: DEFAULT_INTER_ITEM_DELAY,
            weak_digest_fallback: true,
            volatile_params: DEFAULT_VOLATILE_PARAMS
                .iter()
                .map(ToString::to_string)
                .collect(),
            volatile_prefixes: DEFAULT_VOLATILE_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl DeduplicationConfig {
    /// Creates a configuration from defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies `IMGDEDUP_*` overrides resolved through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "IMGDEDUP_SIZE_FILTER", parse_bool) {
            self.size_filter_enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "IMGDEDUP_MIN_SIZE_KB", |s| s.parse().ok()) {
            self.min_size_kb = v;
        }
        if let Some(v) = parse_var(&lookup, "IMGDEDUP_FLUSH_INTERVAL", |s| s.parse().ok()) {
            self.persist_flush_interval = v;
        }
        if let Some(v) = parse_var(&lookup, "IMGDEDUP_BLOOM_EXPECTED", |s| s.parse().ok()) {
            self.bloom_expected_elements = v;
        }
        if let Some(v) = parse_var(&lookup, "IMGDEDUP_BLOOM_FP_RATE", |s| s.parse().ok()) {
            self.bloom_false_positive_rate = v;
        }
        if let Some(v) = parse_var(&lookup, "IMGDEDUP_PERSIST_WINDOW", |s| s.parse().ok()) {
            self.persist_window = v;
        }
        if let Some(v) = parse_var(&lookup, "IMGDEDUP_DELAY_MS", |s| s.parse().ok()) {
            self.inter_item_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "IMGDEDUP_WEAK_DIGEST_FALLBACK", parse_bool) {
            self.weak_digest_fallback = v;
        }
        self
    }

    /// Minimum payload size in bytes.
    #[must_use]
    pub const fn min_size_bytes(&self) -> u64 {
        self.min_size_kb.saturating_mul(1024)
    }

    /// Scheduling policy derived from this configuration.
    #[must_use]
    pub const fn schedule(&self) -> SchedulePolicy {
        SchedulePolicy {
            inter_item_delay: self.inter_item_delay,
        }
    }

    /// Builder method to toggle the size filter.
    #[must_use]
    pub const fn with_size_filter(mut self, enabled: bool) -> Self {
        self.size_filter_enabled = enabled;
        self
    }

    /// Builder method to set the minimum size in KiB.
    #[must_use]
    pub const fn with_min_size_kb(mut self, kb: u64) -> Self {
        self.min_size_kb = kb;
        self
    }

    /// Builder method to set the flush interval.
    #[must_use]
    pub const fn with_flush_interval(mut self, commits: u32) -> Self {
        self.persist_flush_interval = commits;
        self
    }

    /// Builder method to set the Bloom filter sizing.
    #[must_use]
    pub const fn with_bloom(mut self, expected_elements: u64, false_positive_rate: f64) -> Self {
        self.bloom_expected_elements = expected_elements;
        self.bloom_false_positive_rate = false_positive_rate;
        self
    }

    /// Builder method to set the persisted window.
    #[must_use]
    pub const fn with_persist_window(mut self, window: usize) -> Self {
        self.persist_window = window;
        self
    }

    /// Builder method to set the inter-item delay.
    #[must_use]
    pub const fn with_inter_item_delay(mut self, delay: Duration) -> Self {
        self.inter_item_delay = delay;
        self
    }

    /// Builder method to toggle the weak digest fallback.
    #[must_use]
    pub const fn with_weak_digest_fallback(mut self, enabled: bool) -> Self {
        self.weak_digest_fallback = enabled;
        self
    }

    /// Builder method to replace the volatile parameter names.
    #[must_use]
    pub fn with_volatile_params(mut self, params: Vec<String>) -> Self {
        self.volatile_params = params;
        self
    }

    /// Builder method to replace the volatile parameter prefixes.
    #[must_use]
    pub fn with_volatile_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.volatile_prefixes = prefixes;
        self
    }
}

/// How a batch paces its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Pause between two consecutive candidates.
    pub inter_item_delay: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            inter_item_delay: DEFAULT_INTER_ITEM_DELAY,
        }
    }
}

fn parse_var<T, L, P>(lookup: &L, name: &str, parse: P) -> Option<T>
where
    L: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let raw = lookup(name)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        tracing::warn!(variable = name, value = %raw, "Ignoring unparseable override");
    }
    parsed
}

/// Parses the usual boolean spellings.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
