use encoding_rs::Encoding;
use serde::Deserialize;
use url::Url;

/// Which user agent a feed is requested with.
///
/// Unrecognised values deserialize to [`Agent::Bot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Chrome,
    Reader,
    #[default]
    #[serde(other)]
    Bot,
}

/// Syntactic flavour of a source's payload. Decides which parser runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// RSS 1.0 / RDF with a flat `item` list.
    Rdf,
    /// Atom `entry` elements.
    Atom,
    /// RSS 2.0 and look-alikes.
    Rss,
    /// A scraped HTML listing page.
    StructuredHtml,
}

impl Dialect {
    /// Dialect used when a source does not name one.
    ///
    /// Community-discussion sources tagged `r/...` serve Atom, `slashdot`
    /// serves RDF, everything else is treated as RSS 2.0.
    pub fn infer(header: &str) -> Self {
        if header.starts_with("r/") {
            Dialect::Atom
        } else if header.eq_ignore_ascii_case("slashdot") {
            Dialect::Rdf
        } else {
            Dialect::Rss
        }
    }
}

/// A configured news source. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct FeedSource {
    /// Unique tag shown in front of every headline from this source.
    pub header: String,
    pub url: Url,
    pub agent: Agent,
    /// Send `Sec-Fetch-*` headers to look like a browser navigation.
    pub enhanced_headers: bool,
    pub dialect: Dialect,
    /// Legacy body encoding to convert to UTF-8 before parsing.
    pub encoding: Option<&'static Encoding>,
    /// Base that relative links in scraped HTML are resolved against.
    pub origin: Url,
    pub topic: Option<String>,
    pub source: Option<String>,
}

impl FeedSource {
    /// Creates an RSS source with defaults for everything but header and URL.
    pub fn new(header: impl Into<String>, url: Url) -> Self {
        let header = header.into();
        Self {
            dialect: Dialect::infer(&header),
            header,
            origin: url.clone(),
            url,
            agent: Agent::Bot,
            enhanced_headers: false,
            encoding: None,
            topic: None,
            source: None,
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }
}
