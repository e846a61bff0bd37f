use std::future::Future;
use std::time::Duration;

/// How long to wait between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// `base * 2^(attempt - 1)`: 500ms, 1s, 2s... for a 500ms base.
    Exponential { base: Duration },
    /// `step * attempt`: 1s, 2s, 3s... for a 1s step.
    Linear { step: Duration },
}

impl Backoff {
    /// Delay to sleep after the failed `attempt` (1-based) before the next one.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Exponential { base } => base.saturating_mul(1u32 << (attempt - 1).min(16)),
            Backoff::Linear { step } => step.saturating_mul(attempt),
        }
    }
}

/// Bounded retry policy shared by the fetcher, the publication writer and
/// digest delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero behaves as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Feed downloads: 3 attempts, 500ms then 1s.
    pub const fn fetch() -> Self {
        Self::new(
            3,
            Backoff::Exponential {
                base: Duration::from_millis(500),
            },
        )
    }

    /// Digest delivery: 2 attempts, 1s apart.
    pub const fn delivery() -> Self {
        Self::new(
            2,
            Backoff::Linear {
                step: Duration::from_secs(1),
            },
        )
    }

    /// Unprocessed batch items: resent once, immediately.
    pub const fn unprocessed_writes() -> Self {
        Self::new(2, Backoff::None)
    }
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or the policy runs out of attempts. The last error is returned.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, P>(
    policy: RetryPolicy,
    label: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.backoff.delay(attempt);
                tracing::warn!(
                    op = label,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
