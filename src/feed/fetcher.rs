use futures::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT,
};
use std::time::Duration;
use thiserror::Error;

use super::encoding::transcode_to_utf8;
use super::source::{Agent, FeedSource};
use crate::util::retry::{retry, RetryPolicy};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Default deadline for one attempt, covering the request and the body read.
/// The retry budget comes on top of this.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(40);

const ACCEPT_FEEDS: &str = "application/rss+xml, application/atom+xml, application/xml, text/xml, */*";

const CHROME_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";
const READER_AGENT: &str = "Mozilla/5.0 (compatible; RSS Reader Bot 1.0)";

/// Errors that can occur while downloading a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// A single attempt ran past its deadline
    #[error("Request timed out")]
    Timeout,
    /// The server answered with anything but 200 OK
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

impl FetchError {
    /// Only transport failures are retried. A response with a bad status is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::HttpStatus(_) | FetchError::ResponseTooLarge => false,
        }
    }
}

/// User agent strings, one per [`Agent`].
#[derive(Debug, Clone)]
pub struct UserAgents {
    pub bot: String,
    pub chrome: String,
    pub reader: String,
}

impl UserAgents {
    /// Bot agent naming the operator's contact address, stock browser and
    /// reader agents.
    pub fn with_contact(contact: &str) -> Self {
        Self {
            bot: format!(
                "Headlines/{} (+mailto:{})",
                env!("CARGO_PKG_VERSION"),
                contact
            ),
            chrome: CHROME_AGENT.to_string(),
            reader: READER_AGENT.to_string(),
        }
    }

    pub fn select(&self, agent: Agent) -> &str {
        match agent {
            Agent::Chrome => &self.chrome,
            Agent::Reader => &self.reader,
            Agent::Bot => &self.bot,
        }
    }
}

/// Downloads feed payloads. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    agents: UserAgents,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, agents: UserAgents) -> Self {
        Self {
            client,
            agents,
            policy: RetryPolicy::fetch(),
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }

    /// Overrides the per-attempt deadline (defaults to [`ATTEMPT_TIMEOUT`]).
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Overrides the transport retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetches the raw body of `feed`, converted to UTF-8 when the source is
    /// configured with a legacy encoding.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] / [`FetchError::Timeout`] once all attempts fail
    /// - [`FetchError::HttpStatus`] on the first non-200 response
    /// - [`FetchError::ResponseTooLarge`] for bodies over 10MB
    pub async fn fetch(&self, feed: &FeedSource) -> Result<Vec<u8>, FetchError> {
        let headers = self.request_headers(feed);

        let body = retry(
            self.policy,
            &feed.header,
            FetchError::is_retryable,
            |_| self.fetch_once(feed, headers.clone()),
        )
        .await?;

        match feed.encoding {
            Some(encoding) => {
                tracing::debug!(
                    header = %feed.header,
                    encoding = encoding.name(),
                    "Transcoding body to UTF-8"
                );
                Ok(transcode_to_utf8(&body, encoding))
            }
            None => Ok(body),
        }
    }

    /// One attempt: send, status check and body read share a single deadline.
    async fn fetch_once(&self, feed: &FeedSource, headers: HeaderMap) -> Result<Vec<u8>, FetchError> {
        let attempt = async {
            let response = self
                .client
                .get(feed.url.clone())
                .headers(headers)
                .send()
                .await
                .map_err(FetchError::Network)?;

            if response.status() != reqwest::StatusCode::OK {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }

            read_limited_bytes(response, MAX_FEED_SIZE).await
        };

        tokio::time::timeout(self.attempt_timeout, attempt)
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    fn request_headers(&self, feed: &FeedSource) -> HeaderMap {
        let mut headers = HeaderMap::new();

        match HeaderValue::from_str(self.agents.select(feed.agent)) {
            Ok(agent) => {
                headers.insert(USER_AGENT, agent);
            }
            Err(e) => {
                tracing::warn!(header = %feed.header, error = %e, "User agent is not a valid header value");
            }
        }
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_FEEDS));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if feed.enhanced_headers {
            headers.insert(
                HeaderName::from_static("sec-fetch-dest"),
                HeaderValue::from_static("document"),
            );
            headers.insert(
                HeaderName::from_static("sec-fetch-mode"),
                HeaderValue::from_static("navigate"),
            );
            headers.insert(
                HeaderName::from_static("sec-fetch-site"),
                HeaderValue::from_static("none"),
            );
        }

        headers
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
