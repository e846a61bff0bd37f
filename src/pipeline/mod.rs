//! One digest run: concurrent per-feed collection, ordered fan-in,
//! deduplication, delivery and publication marking.

mod aggregator;
mod context;

use std::fmt;

use thiserror::Error;

use crate::digest::DeliveryError;
use crate::feed::{Article, FetchError, ParseError};
use crate::storage::StoreError;

pub use aggregator::Aggregator;
pub use context::RunContext;

// ============================================================================
// Error Types
// ============================================================================

/// Why one feed contributed nothing to a run. Never escapes the run.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The run was cancelled while this feed was in flight.
    #[error("Cancelled before completion")]
    Cancelled,

    /// The feed task panicked.
    #[error("Feed task panicked: {0}")]
    Panicked(String),
}

/// Run-level failure.
#[derive(Debug, Error)]
pub enum RunError {
    /// Every delivery attempt failed; nothing was marked.
    #[error("Digest delivery failed: {0}")]
    Delivery(#[source] DeliveryError),

    /// The digest went out but could not be recorded; those articles will
    /// be delivered again next run.
    #[error("Failed to record published articles: {0}")]
    Store(#[source] StoreError),

    /// The run was cancelled before delivery; nothing was sent or marked.
    #[error("Run cancelled before delivery")]
    Cancelled,
}

// ============================================================================
// Data Structures
// ============================================================================

/// Progress of one feed task, reported in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Fetching,
    Parsing,
    Filtering,
    Done,
    Failed,
}

impl fmt::Display for FeedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedPhase::Fetching => "fetching",
            FeedPhase::Parsing => "parsing",
            FeedPhase::Filtering => "filtering",
            FeedPhase::Done => "done",
            FeedPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An unpublished article with its rendered snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    pub article: Article,
    pub snippet: String,
}

/// Unpublished articles of one feed, in feed order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedBatch {
    pub entries: Vec<DigestEntry>,
}

/// Outcome of one feed task. `index` is the feed's position in the
/// configuration and the slot it occupies after fan-in.
#[derive(Debug)]
pub struct FetchResult {
    pub index: usize,
    pub header: String,
    pub result: Result<FeedBatch, FeedError>,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub feeds: usize,
    /// Headers of feeds that contributed nothing because they failed.
    pub failed_feeds: Vec<String>,
    /// Articles in the digest, in digest order. Empty when nothing was new.
    pub delivered: Vec<Article>,
    /// Whether delivered articles were recorded as published.
    pub marked: bool,
}
