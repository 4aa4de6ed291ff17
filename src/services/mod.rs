//! Business logic services.
//!
//! The deduplication engine plus the collaborators that feed it (fetching,
//! original-image resolution) and consume it (saving, batch runs).

pub mod deduplication;

mod batch;
mod download;
mod fetch;
mod resolve;

pub use batch::{BatchOptions, BatchReport, BatchRunner, CancelFlag};
pub use deduplication::{DedupCoordinator, DeduplicationConfig, UrlCanonicalizer};
pub use download::{DirectorySink, DownloadSink, FileNamer};
pub use fetch::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, Fetcher, HttpFetcher, HttpSettings};
pub use resolve::{
    FALLBACK_EXTENSION, SIZE_PARAMS, image_extension, is_supported_image, original_image_url,
};
