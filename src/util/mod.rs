//! Shared helpers.
//!
//! - **Retry**: bounded retry with configurable backoff, used for feed
//!   downloads, publication writes and digest delivery.

pub mod retry;

pub use retry::{retry, Backoff, RetryPolicy};
