//! Integration tests for history persistence across engine sessions.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use imgdedup::models::{DedupStage, FetchError};
use imgdedup::services::deduplication::{
    BLOOM_KEY, BloomFilter, HASHES_KEY, PersistOutcome, URLS_KEY,
};
use imgdedup::services::{DedupCoordinator, DeduplicationConfig, Fetcher};
use imgdedup::storage::{InMemoryStore, KeyValueStore, SqliteStore};
use imgdedup::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

/// Answers every URL with the URL itself as the body.
struct EchoFetcher;

impl Fetcher for EchoFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        Ok(url.as_bytes().to_vec())
    }
}

/// In-memory store whose writes can be switched off.
struct FlakyStore {
    inner: InMemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new("https://a.com"),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn refuse(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::OperationFailed {
                operation: "set".to_string(),
                cause: "disk full".to_string(),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.refuse()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.refuse()?;
        self.inner.remove(key)
    }

    fn scope(&self) -> &str {
        self.inner.scope()
    }
}

fn open(dir: &TempDir, scope: &str) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(dir.path().join("history.db"), scope).unwrap())
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = TempDir::new().unwrap();

    let mut first = DedupCoordinator::init(DeduplicationConfig::default(), open(&dir, "https://a.com"))
        .unwrap();
    assert!(first.process("https://a.com/1.jpg", &EchoFetcher).await.is_committed());
    assert!(first.process("https://a.com/2.jpg", &EchoFetcher).await.is_committed());
    assert!(matches!(
        first.shutdown().await,
        PersistOutcome::Written { url_keys: 2, digests: 2, .. }
    ));

    let mut second =
        DedupCoordinator::init(DeduplicationConfig::default(), open(&dir, "https://a.com"))
            .unwrap();
    let status = second.status();
    assert_eq!(status.url_keys, 2);
    assert_eq!(status.digests, 2);
    assert_eq!(status.session_commits, 0);

    let again = second.process("http://a.com/1.jpg?utm_campaign=x", &EchoFetcher).await;
    assert_eq!(again.stage(), DedupStage::SkippedUrlDuplicate);
}

#[tokio::test]
async fn test_scopes_are_isolated() {
    let dir = TempDir::new().unwrap();

    let mut a = DedupCoordinator::init(DeduplicationConfig::default(), open(&dir, "https://a.com"))
        .unwrap();
    a.process("https://a.com/1.jpg", &EchoFetcher).await;
    a.shutdown().await;

    let b = DedupCoordinator::init(DeduplicationConfig::default(), open(&dir, "https://b.com"))
        .unwrap();
    assert_eq!(b.status().url_keys, 0);
    assert_eq!(b.status().digests, 0);
}

#[tokio::test]
async fn test_flush_keeps_only_recent_window() {
    let store = Arc::new(InMemoryStore::new("https://a.com"));
    let config = DeduplicationConfig::default()
        .with_persist_window(2)
        .with_flush_interval(0);
    let mut engine = DedupCoordinator::init(config.clone(), Arc::clone(&store)).unwrap();
    for n in 1..=3 {
        engine
            .process(&format!("https://a.com/{n}.jpg"), &EchoFetcher)
            .await;
    }
    assert!(store.is_empty(), "interval 0 only flushes on shutdown");
    engine.shutdown().await;

    let urls: Vec<String> = serde_json::from_str(&store.get(URLS_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(urls, vec!["https://a.com/2.jpg", "https://a.com/3.jpg"]);

    // The evicted URL is fetched again, but the Bloom filter still holds its
    // digest; without an exact-store hit that positive counts as new.
    let mut restored = DedupCoordinator::init(config, store).unwrap();
    let record = restored.process("https://a.com/1.jpg", &EchoFetcher).await;
    assert_eq!(record.stage(), DedupStage::Committed);
}

#[tokio::test]
async fn test_persistence_failure_degrades_to_memory() {
    let store = Arc::new(FlakyStore::new());
    let config = DeduplicationConfig::default().with_flush_interval(1);
    let mut engine = DedupCoordinator::init(config, Arc::clone(&store)).unwrap();

    engine.process("https://a.com/1.jpg", &EchoFetcher).await;
    assert!(engine.status().durable);

    store.fail_writes.store(true, Ordering::SeqCst);
    let record = engine.process("https://a.com/2.jpg", &EchoFetcher).await;
    assert!(record.is_committed());
    assert!(!engine.status().durable);

    // Later writes are not attempted even once the store recovers.
    store.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(engine.flush().await, PersistOutcome::Disabled);

    // In-memory dedup keeps working.
    let again = engine.process("https://a.com/2.jpg", &EchoFetcher).await;
    assert_eq!(again.stage(), DedupStage::SkippedUrlDuplicate);
}

#[test]
fn test_corrupt_snapshot_starts_fresh() {
    let store = Arc::new(InMemoryStore::new("https://a.com"));
    store.set(BLOOM_KEY, "not base64 at all!").unwrap();
    store.set(URLS_KEY, "[\"https://a.com/1.jpg\"]").unwrap();

    let engine = DedupCoordinator::init(DeduplicationConfig::default(), store).unwrap();
    assert_eq!(engine.status().url_keys, 0);
    assert!(engine.status().durable);
}

#[test]
fn test_restored_filter_sizing_wins() {
    use base64::Engine as _;

    let store = Arc::new(InMemoryStore::new("https://a.com"));
    let small = BloomFilter::new(100, 0.05).unwrap();
    let encoded = base64::engine::general_purpose::STANDARD.encode(small.serialize());
    store.set(BLOOM_KEY, &encoded).unwrap();
    store.set(HASHES_KEY, "[]").unwrap();

    let engine = DedupCoordinator::init(DeduplicationConfig::default(), store).unwrap();
    assert_eq!(engine.status().bloom_bits, small.num_bits());
    assert_eq!(engine.status().bloom_hashes, small.num_hashes());
}

#[tokio::test]
async fn test_clear_removes_persisted_keys() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, "https://a.com");
    let mut engine =
        DedupCoordinator::init(DeduplicationConfig::default(), Arc::clone(&store)).unwrap();
    engine.process("https://a.com/1.jpg", &EchoFetcher).await;
    engine.flush().await;
    assert!(store.contains(BLOOM_KEY).unwrap());

    assert_eq!(engine.clear_history().await, PersistOutcome::Cleared);
    for key in [BLOOM_KEY, URLS_KEY, HASHES_KEY] {
        assert!(!store.contains(key).unwrap());
    }
}
