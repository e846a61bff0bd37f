//! Feed ingestion: downloading, encoding repair and dialect parsing.
//!
//! - [`source`] - configured sources and their dialect / agent tags
//! - [`fetcher`] - HTTP download with transport retries and per-source headers
//! - [`encoding`] - conversion of legacy single-byte bodies to UTF-8
//! - [`parser`] - RDF, Atom, RSS and scraped-HTML parsing into [`Article`]s
//!
//! # Example
//!
//! ```ignore
//! use headlines::feed::{parse, Fetcher, UserAgents};
//!
//! let fetcher = Fetcher::new(reqwest::Client::new(), UserAgents::with_contact("ops@example.com"));
//! let body = fetcher.fetch(&source).await?;
//! let articles = parse(&body, &source)?;
//! ```

mod article;
mod encoding;
mod fetcher;
mod parser;
mod source;

pub use article::Article;
pub use encoding::transcode_to_utf8;
pub use fetcher::{FetchError, Fetcher, UserAgents, ATTEMPT_TIMEOUT};
pub use parser::{parse, ParseError};
pub use source::{Agent, Dialect, FeedSource};
