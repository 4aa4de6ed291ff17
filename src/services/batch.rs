//! Batch runner: drives a candidate stream through the engine.
//!
//! Candidates are handled one at a time in discovery order, separated by the
//! engine's inter-item delay. Committed payloads are handed to the download
//! sink; everything else is only tallied.

use super::deduplication::DedupCoordinator;
use super::download::{DownloadSink, FileNamer};
use super::fetch::Fetcher;
use super::resolve::{is_supported_image, original_image_url};
use crate::models::DedupOutcome;
use crate::storage::KeyValueStore;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::instrument;

/// Shared cancellation signal for an in-flight batch.
///
/// The runner races it against waiting for the next candidate, the
/// inter-item delay, and the engine pipeline, so a cancel takes effect even
/// while a fetch is in flight. The pending candidate is dropped; candidates
/// already committed are not rolled back. Safe to trigger from a non-async
/// thread such as a signal handler.
#[derive(Debug, Clone)]
pub struct CancelFlag(Arc<watch::Sender<bool>>);

impl Default for CancelFlag {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }
}

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes every waiter.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation was requested.
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in `self`, so the wait only ends on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Per-batch options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Rewrite thumbnail locators to their originals before processing.
    pub prefer_original: bool,
    /// Ignore candidates that do not name a supported image format.
    pub filter_extensions: bool,
    /// File naming for saved images.
    pub namer: FileNamer,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            prefer_original: true,
            filter_extensions: true,
            namer: FileNamer::new(true),
        }
    }
}

/// Tally of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Candidates taken from the stream.
    pub total: usize,
    /// Candidates ignored by the format filter.
    pub unsupported: usize,
    /// Candidates committed as new.
    pub committed: usize,
    /// Committed payloads written by the sink.
    pub saved: usize,
    /// Skipped because the canonical URL was known.
    pub skipped_url: usize,
    /// Skipped because the content was known.
    pub skipped_hash: usize,
    /// Skipped by the size filter.
    pub skipped_size: usize,
    /// Fetch or hash failures.
    pub failed: usize,
    /// Committed payloads the sink could not write.
    pub save_failed: usize,
    /// Whether the batch stopped early.
    pub cancelled: bool,
    /// Paths written by the sink, in commit order.
    pub saved_paths: Vec<PathBuf>,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates: {} new ({} saved), {} known url, {} known content, {} too small, {} failed",
            self.total,
            self.committed,
            self.saved,
            self.skipped_url,
            self.skipped_hash,
            self.skipped_size,
            self.failed
        )?;
        if self.unsupported > 0 {
            write!(f, ", {} unsupported", self.unsupported)?;
        }
        if self.save_failed > 0 {
            write!(f, ", {} not saved", self.save_failed)?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Runs candidate streams through a [`DedupCoordinator`].
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    options: BatchOptions,
    cancel: CancelFlag,
}

impl BatchRunner {
    /// Creates a runner.
    #[must_use]
    pub const fn new(options: BatchOptions, cancel: CancelFlag) -> Self {
        Self { options, cancel }
    }

    /// Cancellation handle for this runner.
    #[must_use]
    pub const fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Processes a finite, ordered candidate list.
    #[instrument(skip_all)]
    pub async fn run<S, F, D, I>(
        &self,
        engine: &mut DedupCoordinator<S>,
        candidates: I,
        fetcher: &F,
        sink: &D,
    ) -> BatchReport
    where
        S: KeyValueStore + 'static,
        F: Fetcher,
        D: DownloadSink,
        I: IntoIterator<Item = String>,
    {
        let mut report = BatchReport::default();
        for raw in candidates {
            if !self.pace(engine, &mut report).await {
                break;
            }
            self.handle(engine, &raw, fetcher, sink, &mut report).await;
            if report.cancelled {
                break;
            }
        }
        self.finish(&report);
        report
    }

    /// Processes candidates as they arrive until the sender side closes or
    /// the batch is cancelled, including while waiting for the next one.
    #[instrument(skip_all)]
    pub async fn run_incremental<S, F, D>(
        &self,
        engine: &mut DedupCoordinator<S>,
        mut candidates: mpsc::Receiver<String>,
        fetcher: &F,
        sink: &D,
    ) -> BatchReport
    where
        S: KeyValueStore + 'static,
        F: Fetcher,
        D: DownloadSink,
    {
        let mut report = BatchReport::default();
        loop {
            let raw = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                },
                next = candidates.recv() => match next {
                    Some(raw) => raw,
                    None => break,
                },
            };
            if !self.pace(engine, &mut report).await {
                break;
            }
            self.handle(engine, &raw, fetcher, sink, &mut report).await;
            if report.cancelled {
                break;
            }
        }
        if report.cancelled {
            candidates.close();
        }
        self.finish(&report);
        report
    }

    /// Sleeps the inter-item delay before every candidate but the first.
    /// Returns false when the batch must stop.
    async fn pace<S>(&self, engine: &DedupCoordinator<S>, report: &mut BatchReport) -> bool
    where
        S: KeyValueStore + 'static,
    {
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return false;
        }
        let delay = engine.schedule().inter_item_delay;
        if report.total > 0 && !delay.is_zero() {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    report.cancelled = true;
                    return false;
                },
                () = tokio::time::sleep(delay) => {},
            }
        }
        true
    }

    async fn handle<S, F, D>(
        &self,
        engine: &mut DedupCoordinator<S>,
        raw: &str,
        fetcher: &F,
        sink: &D,
        report: &mut BatchReport,
    ) where
        S: KeyValueStore + 'static,
        F: Fetcher,
        D: DownloadSink,
    {
        report.total += 1;
        let index = report.total;

        if self.options.filter_extensions && !is_supported_image(raw) {
            tracing::debug!(url = raw, "Not a supported image, ignoring");
            report.unsupported += 1;
            return;
        }

        let url = if self.options.prefer_original {
            original_image_url(raw)
        } else {
            raw.to_string()
        };

        let mut record = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                tracing::info!(url = %url, "Cancelled while processing candidate");
                report.cancelled = true;
                return;
            },
            record = engine.process(&url, fetcher) => record,
        };
        match &record.outcome {
            DedupOutcome::SkippedUrlDuplicate => report.skipped_url += 1,
            DedupOutcome::SkippedHashDuplicate { .. } => report.skipped_hash += 1,
            DedupOutcome::SkippedSizeFilter { .. } => report.skipped_size += 1,
            DedupOutcome::Failed { .. } => report.failed += 1,
            DedupOutcome::Committed { .. } => report.committed += 1,
        }

        let Some(payload) = record.take_payload() else {
            return;
        };
        let filename = self.options.namer.file_name(&url, index, Utc::now());
        match sink.save(&payload, &filename).await {
            Ok(path) => {
                report.saved += 1;
                report.saved_paths.push(path);
            },
            Err(e) => {
                report.save_failed += 1;
                tracing::warn!(url = %url, filename = %filename, error = %e, "Committed image could not be saved");
            },
        }
    }

    fn finish(&self, report: &BatchReport) {
        tracing::info!(
            total = report.total,
            committed = report.committed,
            saved = report.saved,
            skipped_url = report.skipped_url,
            skipped_hash = report.skipped_hash,
            skipped_size = report.skipped_size,
            failed = report.failed,
            cancelled = report.cancelled,
            prefer_original = self.options.prefer_original,
            "Batch finished"
        );
    }
}
