use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    DigestEntry, FeedBatch, FeedError, FeedPhase, FetchResult, RunContext, RunError, RunReport,
};
use crate::digest::{render_snippet, DeliveryError, DigestSink};
use crate::feed::{parse, FeedSource, Fetcher};
use crate::storage::{PublicationStore, PublicationTracker};
use crate::util::retry::{retry, RetryPolicy};

/// Drives one digest run over a fixed list of feeds.
pub struct Aggregator<S, D> {
    feeds: Arc<[FeedSource]>,
    fetcher: Fetcher,
    tracker: PublicationTracker<S>,
    sink: D,
    delivery_policy: RetryPolicy,
    dry_run: bool,
}

impl<S, D> Aggregator<S, D>
where
    S: PublicationStore + 'static,
    D: DigestSink,
{
    pub fn new(
        feeds: Vec<FeedSource>,
        fetcher: Fetcher,
        tracker: PublicationTracker<S>,
        sink: D,
    ) -> Self {
        Self {
            feeds: feeds.into(),
            fetcher,
            tracker,
            sink,
            delivery_policy: RetryPolicy::delivery(),
            dry_run: false,
        }
    }

    pub fn with_delivery_policy(mut self, policy: RetryPolicy) -> Self {
        self.delivery_policy = policy;
        self
    }

    /// Deliver without recording anything as published.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn feeds(&self) -> &[FeedSource] {
        &self.feeds
    }

    /// Run every feed concurrently and return one result per feed, in
    /// configuration order.
    ///
    /// All tasks are spawned before any is awaited. A failing, panicking or
    /// cancelled feed only affects its own slot.
    pub async fn collect(&self, ctx: &RunContext) -> Vec<FetchResult> {
        let handles: Vec<_> = self
            .feeds
            .iter()
            .cloned()
            .map(|feed| {
                let span = tracing::debug_span!(parent: ctx.span(), "feed", header = %feed.header);
                let fetcher = self.fetcher.clone();
                let tracker = self.tracker.clone();
                let cancel = ctx.cancellation().clone();
                tokio::spawn(
                    async move { run_feed(&feed, &fetcher, &tracker, &cancel).await }
                        .instrument(span),
                )
            })
            .collect();

        let mut slots: Vec<FetchResult> = Vec::with_capacity(handles.len());
        for (index, (joined, feed)) in join_all(handles)
            .await
            .into_iter()
            .zip(self.feeds.iter())
            .enumerate()
        {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(FeedError::Cancelled),
                Err(e) => Err(FeedError::Panicked(e.to_string())),
            };

            match &result {
                Ok(batch) => tracing::debug!(
                    header = %feed.header,
                    phase = %FeedPhase::Done,
                    new_articles = batch.entries.len(),
                    "Feed finished"
                ),
                Err(FeedError::Parse(e)) if e.is_empty_feed() => tracing::info!(
                    header = %feed.header,
                    phase = %FeedPhase::Failed,
                    "Feed returned no usable articles"
                ),
                Err(e) => tracing::warn!(
                    header = %feed.header,
                    phase = %FeedPhase::Failed,
                    error = %e,
                    "Feed failed"
                ),
            }

            slots.push(FetchResult {
                index,
                header: feed.header.clone(),
                result,
            });
        }
        slots
    }

    /// One full run: collect, merge, deliver, then mark as published.
    ///
    /// Nothing is marked unless delivery succeeded; a run with no new
    /// articles delivers and marks nothing.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport, RunError> {
        self.run_in_span(ctx).instrument(ctx.span().clone()).await
    }

    async fn run_in_span(&self, ctx: &RunContext) -> Result<RunReport, RunError> {
        tracing::info!(feeds = self.feeds.len(), dry_run = self.dry_run, "Run started");

        let results = self.collect(ctx).await;
        let mut report = RunReport {
            feeds: results.len(),
            ..Default::default()
        };
        let entries = merge(results, &mut report.failed_feeds);

        if ctx.is_cancelled() {
            tracing::warn!(pending = entries.len(), "Run cancelled, nothing delivered");
            return Err(RunError::Cancelled);
        }

        if entries.is_empty() {
            tracing::info!(failed = report.failed_feeds.len(), "No new articles");
            return Ok(report);
        }

        let snippets: Vec<String> = entries.iter().map(|e| e.snippet.clone()).collect();
        retry(
            self.delivery_policy,
            "deliver_digest",
            DeliveryError::is_retryable,
            |_attempt| self.sink.deliver(&snippets),
        )
        .await
        .map_err(|e| {
            tracing::error!(articles = snippets.len(), error = %e, "Digest delivery failed");
            RunError::Delivery(e)
        })?;

        report.delivered = entries.into_iter().map(|e| e.article).collect();

        if self.dry_run {
            tracing::info!(articles = report.delivered.len(), "Dry run, not marking articles");
            return Ok(report);
        }

        self.tracker
            .mark_published(&report.delivered)
            .await
            .map_err(|e| {
                tracing::error!(
                    articles = report.delivered.len(),
                    error = %e,
                    "Delivered articles could not be marked; they will be sent again"
                );
                RunError::Store(e)
            })?;
        report.marked = true;

        tracing::info!(
            delivered = report.delivered.len(),
            failed = report.failed_feeds.len(),
            "Run finished"
        );
        Ok(report)
    }
}

/// Concatenate successful slots in order, keeping the first occurrence of
/// each guid. Failed slots are skipped and their headers collected.
fn merge(results: Vec<FetchResult>, failed: &mut Vec<String>) -> Vec<DigestEntry> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for slot in results {
        match slot.result {
            Ok(batch) => {
                for entry in batch.entries {
                    if seen.insert(entry.article.guid.clone()) {
                        merged.push(entry);
                    } else {
                        tracing::debug!(
                            header = %slot.header,
                            guid = %entry.article.guid,
                            "Duplicate article dropped"
                        );
                    }
                }
            }
            Err(_) => failed.push(slot.header),
        }
    }
    merged
}

async fn run_feed<S: PublicationStore>(
    feed: &FeedSource,
    fetcher: &Fetcher,
    tracker: &PublicationTracker<S>,
    cancel: &CancellationToken,
) -> Result<FeedBatch, FeedError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FeedError::Cancelled),
        result = process_feed(feed, fetcher, tracker) => result,
    }
}

/// fetch → parse → drop already-published articles.
async fn process_feed<S: PublicationStore>(
    feed: &FeedSource,
    fetcher: &Fetcher,
    tracker: &PublicationTracker<S>,
) -> Result<FeedBatch, FeedError> {
    tracing::debug!(header = %feed.header, phase = %FeedPhase::Fetching, url = %feed.url);
    let body = fetcher.fetch(feed).await?;

    tracing::debug!(header = %feed.header, phase = %FeedPhase::Parsing, bytes = body.len());
    let articles = parse(&body, feed)?;

    tracing::debug!(header = %feed.header, phase = %FeedPhase::Filtering, articles = articles.len());
    let mut batch = FeedBatch::default();
    for article in articles {
        match tracker.is_published(&article.guid).await {
            Ok(true) => {}
            Ok(false) => {
                let snippet = render_snippet(&article);
                batch.entries.push(DigestEntry { article, snippet });
            }
            Err(e) => {
                tracing::warn!(
                    header = %feed.header,
                    guid = %article.guid,
                    error = %e,
                    "Publication check failed, skipping article"
                );
            }
        }
    }

    Ok(batch)
}
