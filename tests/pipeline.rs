//! Integration tests for a full digest run: concurrent collection, ordered
//! fan-in, deduplication, delivery and publication marking.
//!
//! Feeds are served by wiremock; the store and sink are in-memory doubles
//! that record every call so the tests can assert on side effects.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use headlines::digest::{DeliveryError, DigestSink};
use headlines::feed::{FeedSource, Fetcher, UserAgents};
use headlines::pipeline::{Aggregator, FeedError, RunContext, RunError};
use headlines::storage::{
    PublicationRecord, PublicationStore, PublicationTracker, SqliteStore, StoreError,
};
use headlines::util::{Backoff, RetryPolicy};

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
struct MemoryStore {
    published: Mutex<HashSet<String>>,
    /// `exists` fails for these guids.
    broken: HashSet<String>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl MemoryStore {
    fn with_published(guids: &[&str]) -> Self {
        let store = Self::default();
        store
            .published
            .lock()
            .unwrap()
            .extend(guids.iter().map(|g| g.to_string()));
        store
    }

    fn written(&self) -> Vec<String> {
        self.batches.lock().unwrap().concat()
    }
}

#[async_trait]
impl PublicationStore for MemoryStore {
    async fn exists(&self, guid: &str) -> Result<bool, StoreError> {
        if self.broken.contains(guid) {
            return Err(StoreError::Busy("lookup refused".to_string()));
        }
        Ok(self.published.lock().unwrap().contains(guid))
    }

    async fn batch_put(
        &self,
        records: Vec<PublicationRecord>,
    ) -> Result<Vec<PublicationRecord>, StoreError> {
        let guids: Vec<String> = records.iter().map(|r| r.guid.clone()).collect();
        self.published.lock().unwrap().extend(guids.iter().cloned());
        self.batches.lock().unwrap().push(guids);
        Ok(Vec::new())
    }

    fn max_batch_size(&self) -> usize {
        25
    }
}

#[derive(Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<Vec<String>>>,
    attempts: AtomicU32,
    /// Number of leading attempts that fail.
    failures: u32,
}

impl RecordingSink {
    fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }
}

#[async_trait]
impl DigestSink for RecordingSink {
    async fn deliver(&self, snippets: &[String]) -> Result<(), DeliveryError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(DeliveryError::Unavailable("mail relay down".to_string()));
        }
        self.deliveries.lock().unwrap().push(snippets.to_vec());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn rss(items: &[&str]) -> String {
    let mut body = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>"#);
    for guid in items {
        body.push_str(&format!(
            "<item><title>Story {guid}</title><link>https://news.example/{guid}</link><guid>{guid}</guid></item>"
        ));
    }
    body.push_str("</channel></rss>");
    body
}

async fn serve(server: &MockServer, route: &str, status: u16, body: String, delay_ms: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_string(body)
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(server)
        .await;
}

fn feed(server: &MockServer, header: &str) -> FeedSource {
    let url = Url::parse(&format!("{}/{}", server.uri(), header)).unwrap();
    FeedSource::new(header, url)
}

fn fetcher() -> Fetcher {
    Fetcher::new(reqwest::Client::new(), UserAgents::with_contact("test@example.com"))
        .with_retry_policy(RetryPolicy::new(1, Backoff::None))
}

fn aggregator<S, D>(
    feeds: Vec<FeedSource>,
    store: Arc<S>,
    sink: D,
) -> Aggregator<S, D>
where
    S: PublicationStore + 'static,
    D: DigestSink,
{
    Aggregator::new(feeds, fetcher(), PublicationTracker::new(store), sink)
        .with_delivery_policy(RetryPolicy::new(2, Backoff::None))
}

/// Pulls `(header, guid)` out of rendered snippets.
fn delivered_guids(sink: &RecordingSink) -> Vec<String> {
    sink.deliveries
        .lock()
        .unwrap()
        .concat()
        .iter()
        .map(|snippet| {
            let start = snippet.find("https://news.example/").unwrap() + "https://news.example/".len();
            let end = snippet[start..].find('"').unwrap() + start;
            snippet[start..end].to_string()
        })
        .collect()
}

// ============================================================================
// Ordering and deduplication
// ============================================================================

#[tokio::test]
async fn test_digest_follows_feed_order_not_completion_order() {
    let server = MockServer::start().await;
    serve(&server, "/alpha", 200, rss(&["a1", "a2"]), 300).await;
    serve(&server, "/beta", 200, rss(&["b1"]), 150).await;
    serve(&server, "/gamma", 200, rss(&["c1", "c2"]), 0).await;

    let store = Arc::new(MemoryStore::default());
    let sink = Arc::new(RecordingSink::default());
    let feeds = vec![feed(&server, "alpha"), feed(&server, "beta"), feed(&server, "gamma")];

    let report = aggregator(feeds, Arc::clone(&store), Arc::clone(&sink))
        .run(&RunContext::new())
        .await
        .unwrap();

    assert_eq!(delivered_guids(&sink), vec!["a1", "a2", "b1", "c1", "c2"]);
    let headers: Vec<&str> = report.delivered.iter().map(|a| a.header.as_str()).collect();
    assert_eq!(headers, vec!["alpha", "alpha", "beta", "gamma", "gamma"]);
    assert_eq!(store.written(), vec!["a1", "a2", "b1", "c1", "c2"]);
    assert!(report.marked);
}

#[tokio::test]
async fn test_feeds_are_fetched_concurrently() {
    let server = MockServer::start().await;
    for route in ["/one", "/two", "/three", "/four"] {
        serve(&server, route, 200, rss(&[&route[1..]]), 400).await;
    }

    let sink = Arc::new(RecordingSink::default());
    let feeds = ["one", "two", "three", "four"]
        .iter()
        .map(|h| feed(&server, h))
        .collect();

    let started = Instant::now();
    aggregator(feeds, Arc::new(MemoryStore::default()), Arc::clone(&sink))
        .run(&RunContext::new())
        .await
        .unwrap();

    // Sequential fetching would take at least 1.6s.
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(delivered_guids(&sink), vec!["one", "two", "three", "four"]);
}

#[tokio::test]
async fn test_duplicate_guid_kept_at_earliest_feed() {
    let server = MockServer::start().await;
    serve(&server, "/first", 200, rss(&["shared", "f1"]), 200).await;
    serve(&server, "/second", 200, rss(&["s1", "shared"]), 0).await;

    let store = Arc::new(MemoryStore::default());
    let sink = Arc::new(RecordingSink::default());
    let feeds = vec![feed(&server, "first"), feed(&server, "second")];

    let report = aggregator(feeds, Arc::clone(&store), Arc::clone(&sink))
        .run(&RunContext::new())
        .await
        .unwrap();

    assert_eq!(delivered_guids(&sink), vec!["shared", "f1", "s1"]);
    assert_eq!(report.delivered[0].header, "first");
    assert_eq!(store.written().len(), 3);
}

// ============================================================================
// Filtering
// ============================================================================

#[tokio::test]
async fn test_published_articles_are_excluded() {
    let server = MockServer::start().await;
    serve(&server, "/news", 200, rss(&["old", "new"]), 0).await;

    let store = Arc::new(MemoryStore::with_published(&["old"]));
    let sink = Arc::new(RecordingSink::default());

    aggregator(vec![feed(&server, "news")], Arc::clone(&store), Arc::clone(&sink))
        .run(&RunContext::new())
        .await
        .unwrap();

    assert_eq!(delivered_guids(&sink), vec!["new"]);
    assert_eq!(store.written(), vec!["new"]);
}

#[tokio::test]
async fn test_lookup_failure_skips_only_that_article() {
    let server = MockServer::start().await;
    serve(&server, "/news", 200, rss(&["x", "y", "z"]), 0).await;

    let store = Arc::new(MemoryStore {
        broken: HashSet::from(["y".to_string()]),
        ..Default::default()
    });
    let sink = Arc::new(RecordingSink::default());

    aggregator(vec![feed(&server, "news")], Arc::clone(&store), Arc::clone(&sink))
        .run(&RunContext::new())
        .await
        .unwrap();

    assert_eq!(delivered_guids(&sink), vec!["x", "z"]);
}

#[tokio::test]
async fn test_nothing_new_means_no_delivery_and_no_writes() {
    let server = MockServer::start().await;
    serve(&server, "/news", 200, rss(&["seen"]), 0).await;

    let store = Arc::new(MemoryStore::with_published(&["seen"]));
    let sink = Arc::new(RecordingSink::default());

    let report = aggregator(vec![feed(&server, "news")], Arc::clone(&store), Arc::clone(&sink))
        .run(&RunContext::new())
        .await
        .unwrap();

    assert!(report.delivered.is_empty());
    assert!(!report.marked);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);
    assert!(store.batches.lock().unwrap().is_empty());
}

// ============================================================================
// Fault isolation
// ============================================================================

#[tokio::test]
async fn test_failing_feeds_do_not_affect_siblings() {
    let server = MockServer::start().await;
    serve(&server, "/good", 200, rss(&["g1"]), 0).await;
    serve(&server, "/down", 500, String::new(), 0).await;
    serve(&server, "/broken", 200, "<rss><channel><item>".to_string(), 0).await;
    serve(&server, "/empty", 200, rss(&[]), 0).await;
    serve(&server, "/late", 200, rss(&["l1"]), 100).await;

    let sink = Arc::new(RecordingSink::default());
    let feeds = ["good", "down", "broken", "empty", "late"]
        .iter()
        .map(|h| feed(&server, h))
        .collect();

    let report = aggregator(feeds, Arc::new(MemoryStore::default()), Arc::clone(&sink))
        .run(&RunContext::new())
        .await
        .unwrap();

    assert_eq!(delivered_guids(&sink), vec!["g1", "l1"]);
    assert_eq!(report.feeds, 5);
    assert_eq!(report.failed_feeds, vec!["down", "broken", "empty"]);
}

#[tokio::test]
async fn test_collect_reports_one_slot_per_feed() {
    let server = MockServer::start().await;
    serve(&server, "/ok", 200, rss(&["k"]), 50).await;
    serve(&server, "/missing", 404, String::new(), 0).await;

    let feeds = vec![feed(&server, "ok"), feed(&server, "missing")];
    let results = aggregator(feeds, Arc::new(MemoryStore::default()), RecordingSink::default())
        .collect(&RunContext::new())
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].index, 0);
    assert_eq!(results[0].header, "ok");
    assert_eq!(results[0].result.as_ref().unwrap().entries.len(), 1);
    assert_eq!(results[1].index, 1);
    assert!(matches!(results[1].result, Err(FeedError::Fetch(_))));
}

// ============================================================================
// Delivery and marking
// ============================================================================

#[tokio::test]
async fn test_delivery_failure_blocks_marking() {
    let server = MockServer::start().await;
    serve(&server, "/news", 200, rss(&["n1"]), 0).await;

    let store = Arc::new(MemoryStore::default());
    let sink = Arc::new(RecordingSink::failing(u32::MAX));

    let result = aggregator(vec![feed(&server, "news")], Arc::clone(&store), Arc::clone(&sink))
        .run(&RunContext::new())
        .await;

    assert!(matches!(result, Err(RunError::Delivery(_))));
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    assert!(store.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_delivery_retried_with_same_payload() {
    let server = MockServer::start().await;
    serve(&server, "/news", 200, rss(&["n1", "n2"]), 0).await;

    let store = Arc::new(MemoryStore::default());
    let sink = Arc::new(RecordingSink::failing(1));

    let report = aggregator(vec![feed(&server, "news")], Arc::clone(&store), Arc::clone(&sink))
        .run(&RunContext::new())
        .await
        .unwrap();

    assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(delivered_guids(&sink), vec!["n1", "n2"]);
    assert!(report.marked);
    assert_eq!(store.written(), vec!["n1", "n2"]);
}

#[tokio::test]
async fn test_dry_run_delivers_without_marking() {
    let server = MockServer::start().await;
    serve(&server, "/news", 200, rss(&["d1"]), 0).await;

    let store = Arc::new(MemoryStore::default());
    let sink = Arc::new(RecordingSink::default());

    let report = aggregator(vec![feed(&server, "news")], Arc::clone(&store), Arc::clone(&sink))
        .dry_run(true)
        .run(&RunContext::new())
        .await
        .unwrap();

    assert_eq!(delivered_guids(&sink), vec!["d1"]);
    assert!(!report.marked);
    assert!(store.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_run_sends_nothing_with_sqlite_store() {
    let server = MockServer::start().await;
    serve(&server, "/news", 200, rss(&["once-1", "once-2"]), 0).await;

    let store = Arc::new(SqliteStore::open(":memory:").await.unwrap());
    let sink = Arc::new(RecordingSink::default());
    let run = aggregator(vec![feed(&server, "news")], Arc::clone(&store), Arc::clone(&sink));

    let first = run.run(&RunContext::new()).await.unwrap();
    let second = run.run(&RunContext::new()).await.unwrap();

    assert_eq!(first.delivered.len(), 2);
    assert!(second.delivered.is_empty());
    assert_eq!(sink.deliveries.lock().unwrap().len(), 1);
    assert!(store.exists("once-1").await.unwrap());
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancellation_stops_slow_feeds_promptly() {
    let server = MockServer::start().await;
    serve(&server, "/fast", 200, rss(&["f1"]), 0).await;
    serve(&server, "/slow", 200, rss(&["s1"]), 30_000).await;

    let feeds = vec![feed(&server, "fast"), feed(&server, "slow")];
    let run = aggregator(feeds, Arc::new(MemoryStore::default()), RecordingSink::default());
    let ctx = RunContext::new();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let results = run.collect(&ctx).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(results[0].result.is_ok());
    assert!(matches!(results[1].result, Err(FeedError::Cancelled)));
}

#[tokio::test]
async fn test_cancelled_run_delivers_and_marks_nothing() {
    let server = MockServer::start().await;
    serve(&server, "/news", 200, rss(&["c1"]), 0).await;

    let store = Arc::new(MemoryStore::default());
    let sink = Arc::new(RecordingSink::default());
    let ctx = RunContext::new();
    ctx.cancel();

    let result = aggregator(vec![feed(&server, "news")], Arc::clone(&store), Arc::clone(&sink))
        .run(&ctx)
        .await;

    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);
    assert!(store.batches.lock().unwrap().is_empty());
}
