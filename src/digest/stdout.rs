use std::io::Write;

use async_trait::async_trait;

use super::{build_document, DeliveryError, DigestSink, DEFAULT_SUBJECT};

/// Prints the digest document to standard output. Used for dry runs.
#[derive(Debug, Clone)]
pub struct StdoutSink {
    title: String,
}

impl StdoutSink {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new(DEFAULT_SUBJECT)
    }
}

#[async_trait]
impl DigestSink for StdoutSink {
    async fn deliver(&self, snippets: &[String]) -> Result<(), DeliveryError> {
        let document = build_document(&self.title, snippets);
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", document)?;
        out.flush()?;
        Ok(())
    }
}
