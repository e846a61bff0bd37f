//! Collects headlines from a fixed set of news sources, drops everything
//! already delivered, and sends the rest as a single digest.
//!
//! - [`feed`] - download and parse sources into [`feed::Article`]s
//! - [`storage`] - durable record of delivered articles
//! - [`digest`] - snippet rendering and delivery sinks
//! - [`pipeline`] - the concurrent run tying everything together
//! - [`config`] - TOML configuration

pub mod config;
pub mod digest;
pub mod feed;
pub mod pipeline;
pub mod storage;
pub mod util;
