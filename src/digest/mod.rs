//! Digest rendering and delivery.
//!
//! A digest is a list of HTML snippets, one per article. Sinks receive the
//! whole list at once; [`SmtpSink`] mails it, [`StdoutSink`] prints it.

mod email;
mod stdout;

use async_trait::async_trait;
use thiserror::Error;

use crate::feed::Article;

pub use email::SmtpSink;
pub use stdout::StdoutSink;

/// Subject and `<title>` used when the configuration names none.
pub const DEFAULT_SUBJECT: &str = "Core Headlines";

const SEPARATOR: &str = r#"<hr style="border:none;border-top:2px dashed #ccc;margin:12px 0;">"#;

/// Errors raised while delivering a digest.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The message could not be assembled (bad address, bad header).
    #[error("Failed to build digest message: {0}")]
    Message(String),

    /// SMTP transport or server failure.
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// Local output failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink is temporarily unable to accept the digest.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

impl DeliveryError {
    /// Permanent SMTP replies (5xx) and malformed messages are not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Message(_) => false,
            DeliveryError::Smtp(e) => !e.is_permanent(),
            DeliveryError::Io(_) => false,
            DeliveryError::Unavailable(_) => true,
        }
    }
}

/// Destination for a rendered digest.
///
/// A retry resends the same `snippets`; implementations need not dedupe.
#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn deliver(&self, snippets: &[String]) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: DigestSink + ?Sized> DigestSink for Box<T> {
    async fn deliver(&self, snippets: &[String]) -> Result<(), DeliveryError> {
        (**self).deliver(snippets).await
    }
}

#[async_trait]
impl<T: DigestSink + ?Sized> DigestSink for std::sync::Arc<T> {
    async fn deliver(&self, snippets: &[String]) -> Result<(), DeliveryError> {
        (**self).deliver(snippets).await
    }
}

/// One article as a linked HTML paragraph: `header: title`, escaped.
pub fn render_snippet(article: &Article) -> String {
    let title = html_escape::encode_text(article.title.trim());
    let link = html_escape::encode_double_quoted_attribute(article.link.trim());

    let display = if article.header.is_empty() {
        title.into_owned()
    } else {
        format!("{}: {}", html_escape::encode_text(&article.header), title)
    };

    format!(
        r#"<p style="font-family:monospace; font-size:18px; margin:0;"><a href="{}" style="color:#000000; text-decoration:none;">{}</a></p>"#,
        link, display
    )
}

/// Wrap snippets in a standalone HTML document, separated by dashed rules.
pub fn build_document(title: &str, snippets: &[String]) -> String {
    let mut body = String::from(SEPARATOR);
    for snippet in snippets {
        body.push_str(snippet);
        body.push_str(SEPARATOR);
    }

    format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    <meta charset=\"utf-8\">\n    \
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n    \
         <title>{}</title>\n  </head>\n  <body>{}</body>\n</html>",
        html_escape::encode_text(title),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn article(header: &str, title: &str, link: &str) -> Article {
        Article {
            guid: link.to_string(),
            title: title.to_string(),
            link: link.to_string(),
            header: header.to_string(),
            topic: None,
            source: None,
        }
    }

    #[test]
    fn test_render_snippet_shape() {
        let snippet = render_snippet(&article("hackernews", "Rust 2.0", "https://a.example/1"));
        assert_eq!(
            snippet,
            r#"<p style="font-family:monospace; font-size:18px; margin:0;"><a href="https://a.example/1" style="color:#000000; text-decoration:none;">hackernews: Rust 2.0</a></p>"#
        );
    }

    #[test]
    fn test_render_snippet_escapes() {
        let snippet = render_snippet(&article(
            "r/news",
            "<script>alert(1)</script> & more",
            r#"https://a.example/?q="x"&y=1"#,
        ));
        assert!(snippet.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; more"));
        assert!(snippet.contains(r#"href="https://a.example/?q=&quot;x&quot;&amp;y=1""#));
        assert!(!snippet.contains("<script>"));
    }

    #[test]
    fn test_render_snippet_without_header() {
        let snippet = render_snippet(&article("", "Plain", "https://a.example/2"));
        assert!(snippet.contains(">Plain</a>"));
    }

    #[test]
    fn test_build_document_separates_snippets() {
        let doc = build_document("Core Headlines", &["<p>a</p>".to_string(), "<p>b</p>".to_string()]);
        assert!(doc.starts_with("<!DOCTYPE html>"));
        assert!(doc.contains("<title>Core Headlines</title>"));
        assert_eq!(doc.matches("<hr").count(), 3);
        let a = doc.find("<p>a</p>").unwrap();
        let b = doc.find("<p>b</p>").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DeliveryError::Unavailable("down".into()).is_retryable());
        assert!(!DeliveryError::Message("bad address".into()).is_retryable());
    }
}
