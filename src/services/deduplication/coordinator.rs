//! Dedup coordinator: the per-candidate decision pipeline.

use super::bloom::BloomFilter;
use super::canonical::UrlCanonicalizer;
use super::config::{DeduplicationConfig, SchedulePolicy};
use super::exact_store::ExactKeySet;
use super::hasher::ContentHasher;
use super::persistence::{PersistOutcome, PersistenceAdapter, Snapshot};
use crate::models::{
    CanonicalKey, ContentDigest, DedupOutcome, DedupRecord, DedupStage, EngineStatus, FailureKind,
};
use crate::services::fetch::Fetcher;
use crate::storage::KeyValueStore;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// The deduplication engine for one origin scope.
///
/// Owns the Bloom filter and both exact stores. They are only mutated in the
/// commit step of [`process`](Self::process) and by
/// [`clear_history`](Self::clear_history).
///
/// # Pipeline
///
/// ```text
/// raw url ─▶ canonicalize ─▶ URL store hit? ──yes──▶ SkippedUrlDuplicate
///                                  │ no
///                                  ▼
///                               fetch ──err──▶ Failed
///                                  │
///                                  ▼
///                               digest ─▶ Bloom positive and hash store hit? ──yes──▶ SkippedHashDuplicate
///                                  │ no
///                                  ▼
///                            below min size? ──yes──▶ SkippedSizeFilter
///                                  │ no
///                                  ▼
///                               commit ─▶ every K commits: flush
/// ```
///
/// # Example
///
/// ```rust,ignore
/// use imgdedup::services::deduplication::{DedupCoordinator, DeduplicationConfig};
/// use imgdedup::services::HttpFetcher;
/// use imgdedup::storage::SqliteStore;
/// use std::sync::Arc;
///
/// let store = Arc::new(SqliteStore::open("history.db", "https://a.com")?);
/// let mut engine = DedupCoordinator::init(DeduplicationConfig::default(), store)?;
/// let record = engine.process("https://a.com/x.jpg", &HttpFetcher::default()).await;
/// engine.shutdown().await;
/// ```
pub struct DedupCoordinator<S: KeyValueStore> {
    config: DeduplicationConfig,
    canonicalizer: UrlCanonicalizer,
    hasher: ContentHasher,
    bloom: BloomFilter,
    urls: ExactKeySet,
    hashes: ExactKeySet,
    persistence: PersistenceAdapter<S>,
    session_commits: u64,
    commits_since_flush: u32,
}

impl<S: KeyValueStore + 'static> DedupCoordinator<S> {
    /// Builds the engine, restoring persisted history for the store's scope.
    ///
    /// A missing snapshot starts fresh. A corrupt or unreadable snapshot is
    /// logged and also starts fresh. When the restored filter was built with
    /// different `(n, p)` than configured, the restored filter is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the configured Bloom sizing is
    /// invalid. Nothing else is fatal.
    #[instrument(skip(config, store), fields(scope = %store.scope()))]
    pub fn init(config: DeduplicationConfig, store: Arc<S>) -> Result<Self> {
        let fresh = BloomFilter::new(
            config.bloom_expected_elements,
            config.bloom_false_positive_rate,
        )?;
        let persistence = PersistenceAdapter::new(store);
        let canonicalizer =
            UrlCanonicalizer::new(&config.volatile_params, &config.volatile_prefixes);
        let hasher = ContentHasher::new(
            Arc::new(super::hasher::Sha256Digest),
            config.weak_digest_fallback,
        );

        let mut engine = Self {
            config,
            canonicalizer,
            hasher,
            bloom: fresh,
            urls: ExactKeySet::new(),
            hashes: ExactKeySet::new(),
            persistence,
            session_commits: 0,
            commits_since_flush: 0,
        };

        match engine.persistence.load() {
            Ok(Some(state)) => {
                if !state.bloom.has_parameters(
                    engine.config.bloom_expected_elements,
                    engine.config.bloom_false_positive_rate,
                ) {
                    tracing::info!(
                        restored_n = state.bloom.expected_items(),
                        restored_p = state.bloom.false_positive_rate(),
                        configured_n = engine.config.bloom_expected_elements,
                        configured_p = engine.config.bloom_false_positive_rate,
                        "Restored Bloom filter sizing differs from configuration, keeping restored filter"
                    );
                }
                engine.bloom = state.bloom;
                engine.urls.restore(&state.urls);
                engine.hashes.restore(&state.hashes);
                tracing::info!(
                    urls = engine.urls.len(),
                    digests = engine.hashes.len(),
                    fill_ratio = engine.bloom.fill_ratio(),
                    "Restored dedup history"
                );
            },
            Ok(None) => tracing::debug!("No persisted history, starting fresh"),
            Err(e) => {
                tracing::warn!(error = %e, "Could not restore dedup history, starting fresh");
            },
        }

        Ok(engine)
    }

    /// Replaces the content hasher (for a different digest primitive).
    #[must_use]
    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DeduplicationConfig {
        &self.config
    }

    /// Canonicalizer used for URL keys.
    #[must_use]
    pub const fn canonicalizer(&self) -> &UrlCanonicalizer {
        &self.canonicalizer
    }

    /// Pacing policy for batches driving this engine.
    #[must_use]
    pub const fn schedule(&self) -> SchedulePolicy {
        self.config.schedule()
    }

    /// Runs one candidate through the pipeline.
    ///
    /// Never fails: fetch and hash failures are reported as
    /// [`DedupOutcome::Failed`]. The raw URL is what gets fetched; the
    /// canonical key is only an identity.
    #[instrument(skip(self, fetcher), fields(stage = tracing::field::Empty))]
    pub async fn process<F: Fetcher>(&mut self, raw_url: &str, fetcher: &F) -> DedupRecord {
        let start = Instant::now();
        trace_stage(DedupStage::Discovered);
        let key = self.canonicalizer.canonicalize(raw_url);
        let outcome = self.decide(raw_url, &key, fetcher).await;

        let stage = outcome.stage();
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::Span::current().record("stage", stage.as_str());
        metrics::counter!("dedup_outcomes_total", "outcome" => stage.as_str()).increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("dedup_pipeline_duration_ms").record(duration_ms as f64);

        match &outcome {
            DedupOutcome::Failed { failure } => {
                tracing::warn!(key = %key, %failure, "Candidate failed");
            },
            _ => tracing::debug!(key = %key, %stage, duration_ms, "Candidate decided"),
        }

        DedupRecord {
            raw_url: raw_url.to_string(),
            key,
            outcome,
            duration_ms,
        }
    }

    async fn decide<F: Fetcher>(
        &mut self,
        raw_url: &str,
        key: &CanonicalKey,
        fetcher: &F,
    ) -> DedupOutcome {
        trace_stage(DedupStage::UrlChecked);
        if self.urls.has(key.as_str()) {
            return DedupOutcome::SkippedUrlDuplicate;
        }

        trace_stage(DedupStage::Fetching);
        let payload = match fetcher.fetch(raw_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return DedupOutcome::Failed {
                    failure: FailureKind::Fetch(e),
                };
            },
        };

        trace_stage(DedupStage::Fetched);
        let (payload, digest) = self.hasher.hash(payload).await;
        let digest = match digest {
            Ok(digest) => digest,
            Err(e) => {
                return DedupOutcome::Failed {
                    failure: FailureKind::Hash(e.to_string()),
                };
            },
        };

        trace_stage(DedupStage::HashChecked);
        if self.is_known_content(&digest) {
            return DedupOutcome::SkippedHashDuplicate { digest };
        }

        let size = payload.len();
        let too_small = u64::try_from(size).is_ok_and(|len| len < self.config.min_size_bytes());
        if self.config.size_filter_enabled && too_small {
            return DedupOutcome::SkippedSizeFilter { digest, size };
        }

        self.commit(key, &digest).await;
        DedupOutcome::Committed {
            digest,
            size,
            payload,
        }
    }

    /// Bloom negative means new. Bloom positive is confirmed against the
    /// exact hash store; a miss there is a false positive and counts as new.
    fn is_known_content(&self, digest: &ContentDigest) -> bool {
        if digest.is_weak() || !self.bloom.might_contain(digest.as_str()) {
            return false;
        }
        if self.hashes.has(digest.as_str()) {
            return true;
        }
        tracing::debug!(digest = digest.short(), "Bloom false positive, treating as new");
        metrics::counter!("dedup_bloom_false_positive_total").increment(1);
        false
    }

    async fn commit(&mut self, key: &CanonicalKey, digest: &ContentDigest) {
        self.urls.add(key.as_str());
        if !digest.is_weak() {
            self.bloom.add(digest.as_str());
            self.hashes.add(digest.as_str());
        }
        self.session_commits += 1;
        self.commits_since_flush += 1;

        let interval = self.config.persist_flush_interval;
        if interval > 0 && self.commits_since_flush >= interval {
            self.flush().await;
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            bloom: self.bloom.serialize(),
            urls: self.urls.window(self.config.persist_window),
            hashes: self.hashes.window(self.config.persist_window),
        }
    }

    /// Writes a point-in-time snapshot to the store.
    ///
    /// Returns [`PersistOutcome::Disabled`] once an earlier write has failed.
    pub async fn flush(&mut self) -> PersistOutcome {
        self.commits_since_flush = 0;
        let snapshot = self.snapshot();
        let outcome = self.persistence.write(snapshot).await;
        tracing::debug!(result = outcome.as_str(), "Flushed dedup history");
        outcome
    }

    /// Forgets every URL and digest, in memory and in the store.
    #[instrument(skip(self), fields(scope = %self.persistence.scope()))]
    pub async fn clear_history(&mut self) -> PersistOutcome {
        self.bloom.clear();
        self.urls.clear();
        self.hashes.clear();
        self.commits_since_flush = 0;
        let outcome = self.persistence.clear().await;
        tracing::info!(result = outcome.as_str(), "Cleared dedup history");
        outcome
    }

    /// Current counters.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            scope: self.persistence.scope().to_string(),
            url_keys: self.urls.len(),
            digests: self.hashes.len(),
            fill_ratio: self.bloom.fill_ratio(),
            bloom_bits: self.bloom.num_bits(),
            bloom_hashes: self.bloom.num_hashes(),
            session_commits: self.session_commits,
            durable: self.persistence.is_durable(),
        }
    }

    /// Flushes a final snapshot and drops the engine.
    pub async fn shutdown(mut self) -> PersistOutcome {
        let outcome = self.flush().await;
        tracing::info!(
            commits = self.session_commits,
            result = outcome.as_str(),
            "Dedup engine shut down"
        );
        outcome
    }
}

fn trace_stage(stage: DedupStage) {
    tracing::trace!(%stage, "Pipeline stage");
}
