use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Per-run handle: the cancellation token every feed task observes and the
/// span every feed task is instrumented under.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    span: Span,
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        let span = tracing::info_span!("run", started_at = %Utc::now().to_rfc3339());
        Self { cancel, span }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
