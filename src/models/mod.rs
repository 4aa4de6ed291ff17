//! Data models for imgdedup.
//!
//! Identity types, pipeline outcomes, and the status snapshot shared by the
//! engine, the batch runner, and the CLI.

mod keys;
mod outcome;
mod status;

pub use keys::{CanonicalKey, ContentDigest};
pub use outcome::{DedupOutcome, DedupRecord, DedupStage, FailureKind, FetchError};
pub use status::EngineStatus;
