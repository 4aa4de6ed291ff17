//! Integration tests for the dedup pipeline and the batch runner.
//!
//! Fetches are served from memory and saves go to a temporary directory, so
//! these tests run offline.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use imgdedup::models::{DedupOutcome, DedupStage, FailureKind, FetchError};
use imgdedup::services::deduplication::{ContentHasher, DigestPrimitive};
use imgdedup::services::{
    BatchOptions, BatchRunner, CancelFlag, DedupCoordinator, DeduplicationConfig, DirectorySink,
    FileNamer, Fetcher,
};
use imgdedup::storage::InMemoryStore;
use imgdedup::{Error, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

// ============================================================================
// Helpers
// ============================================================================

/// Serves fixed bodies and records every requested URL.
#[derive(Default)]
struct MemoryFetcher {
    bodies: HashMap<String, Vec<u8>>,
    requested: RefCell<Vec<String>>,
}

impl MemoryFetcher {
    fn with(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requested.borrow().clone()
    }
}

impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        self.requested.borrow_mut().push(url.to_string());
        self.bodies.get(url).cloned().ok_or(FetchError::Status(404))
    }
}

/// Never answers, like a server that stalls until the timeout.
struct StalledFetcher;

impl Fetcher for StalledFetcher {
    async fn fetch(&self, _url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        std::future::pending().await
    }
}

/// Cancels `flag` after a short pause.
fn cancel_soon(flag: CancelFlag) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.cancel();
    })
}

/// A digest primitive that is always unavailable.
struct BrokenDigest;

impl DigestPrimitive for BrokenDigest {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn digest(&self, _bytes: &[u8]) -> Result<String> {
        Err(Error::OperationFailed {
            operation: "digest".to_string(),
            cause: "primitive unavailable".to_string(),
        })
    }
}

fn config() -> DeduplicationConfig {
    DeduplicationConfig::default().with_inter_item_delay(Duration::ZERO)
}

fn engine(config: DeduplicationConfig) -> DedupCoordinator<InMemoryStore> {
    DedupCoordinator::init(config, Arc::new(InMemoryStore::new("https://a.com"))).unwrap()
}

fn keep_names() -> BatchOptions {
    BatchOptions {
        namer: FileNamer::new(false),
        ..BatchOptions::default()
    }
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

// ============================================================================
// Engine
// ============================================================================

#[tokio::test]
async fn test_size_filter_does_not_pollute_history() {
    let fetcher = MemoryFetcher::default()
        .with("https://a.com/tiny.png", b"tiny")
        .with("https://a.com/big.png", &[7u8; 4096]);
    let mut engine = engine(config().with_size_filter(true).with_min_size_kb(1));

    let tiny = engine.process("https://a.com/tiny.png", &fetcher).await;
    assert!(matches!(
        tiny.outcome,
        DedupOutcome::SkippedSizeFilter { size: 4, .. }
    ));
    assert_eq!(engine.status().url_keys, 0);
    assert_eq!(engine.status().digests, 0);

    // A skipped candidate is fetched again next time.
    engine.process("https://a.com/tiny.png", &fetcher).await;
    assert_eq!(fetcher.requested().len(), 2);

    let big = engine.process("https://a.com/big.png", &fetcher).await;
    assert_eq!(big.stage(), DedupStage::Committed);
}

#[tokio::test]
async fn test_clear_history_forgets_everything() {
    let fetcher = MemoryFetcher::default().with("https://a.com/x.jpg", b"pixels");
    let mut engine = engine(config());

    assert!(engine.process("https://a.com/x.jpg", &fetcher).await.is_committed());
    assert_eq!(
        engine.process("https://a.com/x.jpg", &fetcher).await.stage(),
        DedupStage::SkippedUrlDuplicate
    );

    engine.clear_history().await;
    let status = engine.status();
    assert_eq!(status.url_keys, 0);
    assert_eq!(status.digests, 0);
    assert!(status.fill_ratio.abs() < f64::EPSILON);

    assert!(engine.process("https://a.com/x.jpg", &fetcher).await.is_committed());
}

#[tokio::test]
async fn test_weak_digest_commits_url_only() {
    let fetcher = MemoryFetcher::default()
        .with("https://a.com/1.jpg", b"same")
        .with("https://a.com/2.jpg", b"same");
    let mut engine =
        engine(config()).with_hasher(ContentHasher::new(Arc::new(BrokenDigest), true));

    let first = engine.process("https://a.com/1.jpg", &fetcher).await;
    let DedupOutcome::Committed { digest, .. } = &first.outcome else {
        unreachable!("weak fallback commits");
    };
    assert!(digest.is_weak());

    // Content dedup is off for weak digests, so identical bytes commit again.
    assert!(engine.process("https://a.com/2.jpg", &fetcher).await.is_committed());
    let status = engine.status();
    assert_eq!(status.url_keys, 2);
    assert_eq!(status.digests, 0);
}

#[tokio::test]
async fn test_hash_failure_without_fallback() {
    let fetcher = MemoryFetcher::default().with("https://a.com/1.jpg", b"bytes");
    let mut engine =
        engine(config()).with_hasher(ContentHasher::new(Arc::new(BrokenDigest), false));

    let record = engine.process("https://a.com/1.jpg", &fetcher).await;
    assert!(matches!(
        record.outcome,
        DedupOutcome::Failed {
            failure: FailureKind::Hash(_)
        }
    ));
    assert_eq!(engine.status().url_keys, 0);
}

// ============================================================================
// Batch runner
// ============================================================================

#[tokio::test]
async fn test_batch_tallies_and_saves_new_images_only() {
    let dir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::default()
        .with("https://a.com/cat.jpg", b"cat")
        .with("https://a.com/dog.png?utm_source=feed", b"dog")
        .with("https://b.com/mirror/cat.jpg", b"cat");
    let sink = DirectorySink::new(dir.path());
    let mut engine = engine(config());
    let runner = BatchRunner::new(keep_names(), CancelFlag::new());

    let report = runner
        .run(
            &mut engine,
            urls(&[
                "https://a.com/cat.jpg",
                "https://a.com/dog.png?utm_source=feed",
                "http://a.com/cat.jpg",
                "https://b.com/mirror/cat.jpg",
                "https://a.com/missing.gif",
                "https://a.com/page.html",
            ]),
            &fetcher,
            &sink,
        )
        .await;

    assert_eq!(report.total, 6);
    assert_eq!(report.committed, 2);
    assert_eq!(report.saved, 2);
    assert_eq!(report.skipped_url, 1);
    assert_eq!(report.skipped_hash, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.unsupported, 1);
    assert!(!report.cancelled);

    assert_eq!(std::fs::read(dir.path().join("cat.jpg")).unwrap(), b"cat");
    assert_eq!(std::fs::read(dir.path().join("dog.png")).unwrap(), b"dog");
    assert!(!fetcher.requested().iter().any(|u| u.ends_with(".html")));
}

#[tokio::test]
async fn test_batch_resolves_original_before_fetching() {
    let dir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::default().with("https://a.com/original/cat.jpg", b"full size");
    let sink = DirectorySink::new(dir.path());
    let mut engine = engine(config());
    let runner = BatchRunner::new(keep_names(), CancelFlag::new());

    let report = runner
        .run(
            &mut engine,
            urls(&["https://a.com/thumb/cat_150x150.jpg?w=150"]),
            &fetcher,
            &sink,
        )
        .await;

    assert_eq!(report.committed, 1);
    assert_eq!(fetcher.requested(), vec!["https://a.com/original/cat.jpg"]);
}

#[tokio::test]
async fn test_cancelled_batch_processes_nothing() {
    let dir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::default().with("https://a.com/x.jpg", b"x");
    let sink = DirectorySink::new(dir.path());
    let mut engine = engine(config());
    let cancel = CancelFlag::new();
    cancel.cancel();
    let runner = BatchRunner::new(BatchOptions::default(), cancel);

    let report = runner
        .run(&mut engine, urls(&["https://a.com/x.jpg"]), &fetcher, &sink)
        .await;

    assert!(report.cancelled);
    assert_eq!(report.total, 0);
    assert!(fetcher.requested().is_empty());
}

#[tokio::test]
async fn test_cancel_ends_incremental_batch_waiting_for_input() {
    let dir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::default();
    let sink = DirectorySink::new(dir.path());
    let mut engine = engine(config());
    let cancel = CancelFlag::new();
    let runner = BatchRunner::new(keep_names(), cancel.clone());

    let (tx, rx) = mpsc::channel::<String>(4);
    let trigger = cancel_soon(cancel);

    // The sender stays open, so only the cancel can end the batch.
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        runner.run_incremental(&mut engine, rx, &fetcher, &sink),
    )
    .await
    .expect("cancel should end a batch parked on an open channel");
    trigger.await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.total, 0);
    assert!(fetcher.requested().is_empty());
    assert!(tx.is_closed());
}

#[tokio::test]
async fn test_cancel_interrupts_in_flight_fetch() {
    let dir = TempDir::new().unwrap();
    let sink = DirectorySink::new(dir.path());
    let mut engine = engine(config());
    let cancel = CancelFlag::new();
    let runner = BatchRunner::new(keep_names(), cancel.clone());
    let trigger = cancel_soon(cancel);

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        runner.run(
            &mut engine,
            urls(&["https://a.com/slow.jpg", "https://a.com/next.jpg"]),
            &StalledFetcher,
            &sink,
        ),
    )
    .await
    .expect("cancel should abandon a stalled fetch");
    trigger.await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.total, 1);
    assert_eq!(report.committed + report.failed, 0);
    assert_eq!(engine.status().url_keys, 0);
}

#[tokio::test]
async fn test_cancel_interrupts_inter_item_delay() {
    let dir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::default().with("https://a.com/1.png", b"one");
    let sink = DirectorySink::new(dir.path());
    let mut engine = engine(config().with_inter_item_delay(Duration::from_secs(60)));
    let cancel = CancelFlag::new();
    let runner = BatchRunner::new(keep_names(), cancel.clone());
    let trigger = cancel_soon(cancel);

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        runner.run(
            &mut engine,
            urls(&["https://a.com/1.png", "https://a.com/2.png"]),
            &fetcher,
            &sink,
        ),
    )
    .await
    .expect("cancel should cut the delay short");
    trigger.await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.total, 1);
    assert_eq!(fetcher.requested(), vec!["https://a.com/1.png"]);
}

#[tokio::test]
async fn test_incremental_batch_matches_repeats_across_streams() {
    let dir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::default()
        .with("https://a.com/1.png", b"one")
        .with("https://a.com/2.png", b"two");
    let sink = DirectorySink::new(dir.path());
    let mut engine = engine(config());
    let runner = BatchRunner::new(keep_names(), CancelFlag::new());

    let first = runner
        .run(&mut engine, urls(&["https://a.com/1.png"]), &fetcher, &sink)
        .await;
    assert_eq!(first.committed, 1);

    let (tx, rx) = mpsc::channel(4);
    let producer = tokio::spawn(async move {
        for url in ["https://a.com/1.png", "https://a.com/2.png", "https://a.com/2.png"] {
            tx.send(url.to_string()).await.unwrap();
        }
    });
    let second = runner.run_incremental(&mut engine, rx, &fetcher, &sink).await;
    producer.await.unwrap();

    assert_eq!(second.total, 3);
    assert_eq!(second.committed, 1);
    assert_eq!(second.skipped_url, 2);
    assert_eq!(engine.status().session_commits, 2);
}

#[tokio::test]
async fn test_generated_names_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::default()
        .with("https://a.com/a/img.jpg", b"a")
        .with("https://a.com/b/img.jpg", b"b");
    let sink = DirectorySink::new(dir.path());
    let mut engine = engine(config());
    let runner = BatchRunner::new(keep_names(), CancelFlag::new());

    let report = runner
        .run(
            &mut engine,
            urls(&["https://a.com/a/img.jpg", "https://a.com/b/img.jpg"]),
            &fetcher,
            &sink,
        )
        .await;

    assert_eq!(report.saved, 2);
    assert!(dir.path().join("img.jpg").exists());
    assert!(dir.path().join("img-1.jpg").exists());
}
