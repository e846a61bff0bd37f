use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use secrecy::ExposeSecret;

use super::{build_document, DeliveryError, DigestSink};
use crate::config::SmtpConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Mails the digest as one HTML message over implicit TLS.
pub struct SmtpSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    subject: String,
}

impl SmtpSink {
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        let from = parse_mailbox(&config.from)?;
        let to = parse_mailbox(&config.to)?;

        Ok(Self {
            mailer,
            from,
            to,
            subject: config.subject.clone(),
        })
    }

    fn message(&self, snippets: &[String]) -> Result<Message, DeliveryError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(self.subject.clone())
            .header(header::ContentType::TEXT_HTML)
            .body(build_document(&self.subject, snippets))
            .map_err(|e| DeliveryError::Message(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse()
        .map_err(|e| DeliveryError::Message(format!("invalid address {:?}: {}", address, e)))
}

#[async_trait]
impl DigestSink for SmtpSink {
    async fn deliver(&self, snippets: &[String]) -> Result<(), DeliveryError> {
        let message = self.message(snippets)?;
        let response = self.mailer.send(message).await?;
        tracing::info!(
            to = %self.to,
            articles = snippets.len(),
            code = %response.code(),
            "Digest sent"
        );
        Ok(())
    }
}
