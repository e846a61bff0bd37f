//! Configuration file parser for `headlines.toml`.
//!
//! The file is required: it lists the feeds to poll. Unknown keys are
//! accepted and logged as warnings so typos do not go unnoticed.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use encoding_rs::Encoding;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::digest::DEFAULT_SUBJECT;
use crate::feed::{Agent, Dialect, FeedSource};

/// Environment variable that overrides `smtp.password`.
pub const PASSWORD_ENV: &str = "HEADLINES_SMTP_PASSWORD";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Well-formed TOML describing an unusable configuration.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// File Layout
// ============================================================================

#[derive(Deserialize)]
#[serde(default)]
struct RawConfig {
    database_path: PathBuf,
    contact: Option<String>,
    run_timeout_secs: u64,
    smtp: Option<RawSmtp>,
    feeds: Vec<FeedConfig>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("headlines.db"),
            contact: None,
            run_timeout_secs: 300,
            smtp: None,
            feeds: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawSmtp {
    host: String,
    #[serde(default = "default_smtp_port")]
    port: u16,
    username: String,
    password: Option<String>,
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
}

fn default_smtp_port() -> u16 {
    465
}

/// One `[[feeds]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    pub header: String,
    #[serde(default)]
    pub agent: Agent,
    #[serde(default)]
    pub enhanced_headers: bool,
    /// Inferred from `header` when absent.
    pub dialect: Option<Dialect>,
    /// WHATWG encoding label, e.g. `"iso-8859-1"`.
    pub encoding: Option<String>,
    /// Base for relative links in scraped HTML. Defaults to `url`.
    pub origin: Option<String>,
    pub topic: Option<String>,
    pub source: Option<String>,
}

impl FeedConfig {
    pub fn into_source(self) -> Result<FeedSource, ConfigError> {
        let header = self.header.trim().to_string();
        if header.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "feed {} has an empty header",
                self.url
            )));
        }

        let url = parse_http_url(&header, "url", &self.url)?;
        let mut feed = FeedSource::new(header, url).with_agent(self.agent);
        feed.enhanced_headers = self.enhanced_headers;
        feed.topic = self.topic.filter(|t| !t.trim().is_empty());
        feed.source = self.source.filter(|s| !s.trim().is_empty());

        if let Some(dialect) = self.dialect {
            feed = feed.with_dialect(dialect);
        }
        if let Some(label) = self.encoding {
            let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "feed {}: unknown encoding {:?}",
                    feed.header, label
                ))
            })?;
            feed = feed.with_encoding(encoding);
        }
        if let Some(origin) = self.origin {
            let origin = parse_http_url(&feed.header, "origin", &origin)?;
            feed = feed.with_origin(origin);
        }

        Ok(feed)
    }
}

fn parse_http_url(header: &str, field: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::Invalid(format!("feed {}: bad {} {:?}: {}", header, field, raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::Invalid(format!(
            "feed {}: {} must be http(s), got {}",
            header, field, scheme
        ))),
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// SMTP account the digest is mailed through.
///
/// Custom Debug impl masks `password`.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Sender address. Defaults to `username`.
    pub from: String,
    /// Recipient address. Defaults to `from`.
    pub to: String,
    pub subject: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("subject", &self.subject)
            .finish()
    }
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    /// Address advertised in the bot user agent.
    pub contact: String,
    /// Upper bound on one whole run.
    pub run_timeout: Duration,
    /// Absent only for dry runs.
    pub smtp: Option<SmtpConfig>,
    /// Sources in the order their headlines appear in the digest.
    pub feeds: Vec<FeedSource>,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] =
        ["database_path", "contact", "run_timeout_secs", "smtp", "feeds"];

    /// Load configuration from a TOML file.
    ///
    /// `HEADLINES_SMTP_PASSWORD`, when set, replaces `smtp.password`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let password_override = std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty());
        let config = Self::parse(&content, password_override)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            smtp = config.smtp.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML text. `password_override` wins over the file.
    pub fn parse(content: &str, password_override: Option<String>) -> Result<Self, ConfigError> {
        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let raw: RawConfig = toml::from_str(content)?;

        if raw.feeds.is_empty() {
            return Err(ConfigError::Invalid("no [[feeds]] configured".to_string()));
        }
        if raw.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "run_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut feeds = Vec::with_capacity(raw.feeds.len());
        for feed in raw.feeds {
            let feed = feed.into_source()?;
            if !seen.insert(feed.header.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate feed header {:?}",
                    feed.header
                )));
            }
            feeds.push(feed);
        }

        let smtp = raw
            .smtp
            .map(|smtp| resolve_smtp(smtp, password_override))
            .transpose()?;

        let contact = raw
            .contact
            .filter(|c| !c.trim().is_empty())
            .or_else(|| smtp.as_ref().map(|s| s.from.clone()))
            .ok_or_else(|| {
                ConfigError::Invalid("contact is required when [smtp] is absent".to_string())
            })?;

        Ok(Self {
            database_path: raw.database_path,
            contact,
            run_timeout: Duration::from_secs(raw.run_timeout_secs),
            smtp,
            feeds,
        })
    }
}

fn resolve_smtp(raw: RawSmtp, password_override: Option<String>) -> Result<SmtpConfig, ConfigError> {
    let password = password_override
        .or(raw.password)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "smtp.password is not set (use the file or {})",
                PASSWORD_ENV
            ))
        })?;

    let from = raw.from.unwrap_or_else(|| raw.username.clone());
    let to = raw.to.unwrap_or_else(|| from.clone());

    Ok(SmtpConfig {
        host: raw.host,
        port: raw.port,
        username: raw.username,
        password: SecretString::from(password),
        from,
        to,
        subject: raw.subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
    })
}

// ============================================================================
// Tests
// ============================================================================
