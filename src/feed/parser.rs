use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use scraper::{Html, Selector};
use thiserror::Error;

use super::article::Article;
use super::source::{Dialect, FeedSource};

/// Listing entries the scraped page marks as fully relevant.
const HTML_ENTRY_SELECTOR: &str = "li[data-relevancy='1.0']";
const HTML_LINK_SELECTOR: &str = "a";
const HTML_TITLE_SELECTOR: &str = "h3.title";

/// Errors produced while turning a payload into articles.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Payload is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),
    /// HTML selectors could not be built.
    #[error("HTML parse error: {0}")]
    Html(String),
    /// Nothing survived validation. Callers usually treat this as "no news".
    #[error("No valid articles found in {0} payload")]
    Empty(&'static str),
}

impl ParseError {
    pub fn is_empty_feed(&self) -> bool {
        matches!(self, ParseError::Empty(_))
    }
}

/// Parses a fetched payload into articles using the source's dialect.
///
/// Entries missing a title, a link or an identity are dropped. If none are
/// left the call fails with [`ParseError::Empty`].
pub fn parse(body: &[u8], feed: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let (articles, dialect) = match feed.dialect {
        Dialect::Rdf => (parse_rdf(body, feed)?, "RDF"),
        Dialect::Atom => (parse_atom(body, feed)?, "Atom"),
        Dialect::Rss => (parse_rss(body, feed)?, "RSS"),
        Dialect::StructuredHtml => (parse_html(body, feed)?, "HTML"),
    };

    if articles.is_empty() {
        return Err(ParseError::Empty(dialect));
    }

    tracing::debug!(header = %feed.header, count = articles.len(), "Parsed articles");
    Ok(articles)
}

fn parse_rdf(body: &[u8], feed: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let entries = collect_entries(body, b"item")?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            // Titles arrive double-escaped (`&amp;quot;`), so undo the HTML layer too
            let title = html_escape::decode_html_entities(entry.title.trim());
            let link = entry.link.trim();
            Article::from_parts(feed, link, &title, link)
        })
        .collect())
}

fn parse_atom(body: &[u8], feed: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let entries = collect_entries(body, b"entry")?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            if entry.title.trim().is_empty() {
                return None;
            }
            Article::from_parts(feed, &entry.id, &entry.title, &entry.href)
        })
        .collect())
}

fn parse_rss(body: &[u8], feed: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let entries = collect_entries(body, b"item")?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let link = first_non_empty(&[&entry.link, &entry.href, &entry.guid])?;
            let guid = first_non_empty(&[&entry.guid, &entry.item_id]).unwrap_or(link);
            Article::from_parts(feed, guid, &entry.title, link)
        })
        .collect())
}

fn parse_html(body: &[u8], feed: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let entry_selector =
        Selector::parse(HTML_ENTRY_SELECTOR).map_err(|e| ParseError::Html(e.to_string()))?;
    let link_selector =
        Selector::parse(HTML_LINK_SELECTOR).map_err(|e| ParseError::Html(e.to_string()))?;
    let title_selector =
        Selector::parse(HTML_TITLE_SELECTOR).map_err(|e| ParseError::Html(e.to_string()))?;

    let document = Html::parse_document(&String::from_utf8_lossy(body));
    let mut articles = Vec::new();

    for entry in document.select(&entry_selector) {
        let Some(href) = entry
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        let title: String = entry
            .select(&title_selector)
            .next()
            .map(|h| h.text().collect())
            .unwrap_or_default();

        let link = match feed.origin.join(href) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::debug!(header = %feed.header, href = %href, error = %e, "Skipping unresolvable link");
                continue;
            }
        };

        if let Some(article) = Article::from_parts(feed, &link, &title, &link) {
            articles.push(article);
        }
    }

    Ok(articles)
}

fn first_non_empty<'a>(candidates: &[&'a String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

// ============================================================================
// XML entry collection
// ============================================================================

/// Text and attribute values gathered from the direct children of one
/// `item` / `entry` element. Missing children stay empty.
#[derive(Debug, Default)]
struct RawEntry {
    title: String,
    /// Text of a `<link>` child (RSS style).
    link: String,
    /// `href` of a `<link>` child (Atom style, or `atom:link` inside RSS).
    href: String,
    href_is_alternate: bool,
    guid: String,
    item_id: String,
    id: String,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
    Guid,
    ItemId,
    Id,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"guid" => Some(Field::Guid),
            b"itemID" => Some(Field::ItemId),
            b"id" => Some(Field::Id),
            _ => None,
        }
    }

    fn slot(self, entry: &mut RawEntry) -> &mut String {
        match self {
            Field::Title => &mut entry.title,
            Field::Link => &mut entry.link,
            Field::Guid => &mut entry.guid,
            Field::ItemId => &mut entry.item_id,
            Field::Id => &mut entry.id,
        }
    }
}

/// Walks the document and returns one [`RawEntry`] per `entry_tag` element,
/// wherever it is nested. Elements are matched on their local name so
/// prefixed variants (`rss:item`, `atom:link`) are picked up as well.
fn collect_entries(body: &[u8], entry_tag: &[u8]) -> Result<Vec<RawEntry>, ParseError> {
    let mut reader = Reader::from_reader(body);
    // Untrimmed, so text and CDATA parts of one field keep their spacing
    reader.config_mut().trim_text(false);

    let mut entries = Vec::new();
    let mut buf = Vec::new();

    let mut current: Option<RawEntry> = None;
    // Depth below the current entry element: 1 = direct child
    let mut depth: usize = 0;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if let Some(entry) = current.as_mut() {
                    depth += 1;
                    if depth == 1 {
                        capture_href(&e, &reader, entry);
                        field = Field::from_local_name(e.local_name().as_ref());
                        text.clear();
                    }
                } else if e.local_name().as_ref() == entry_tag {
                    current = Some(RawEntry::default());
                    depth = 0;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    if depth == 0 {
                        capture_href(&e, &reader, entry);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    let value = e
                        .unescape()
                        .map(Cow::into_owned)
                        .unwrap_or_else(|_| lenient_text(&e));
                    text.push_str(&value);
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => {
                if let Some(entry) = current.as_mut() {
                    if depth == 0 {
                        if e.local_name().as_ref() == entry_tag {
                            if let Some(done) = current.take() {
                                entries.push(done);
                            }
                        }
                    } else {
                        if depth == 1 {
                            if let Some(f) = field.take() {
                                let slot = f.slot(entry);
                                if slot.is_empty() {
                                    *slot = text.trim().to_string();
                                }
                                text.clear();
                            }
                        }
                        depth -= 1;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Records the `href` of a `<link>` child the first time one is seen,
/// preferring `rel="alternate"` (or no `rel`) over other relations.
fn capture_href(e: &BytesStart<'_>, reader: &Reader<&[u8]>, entry: &mut RawEntry) {
    if e.local_name().as_ref() != b"link" {
        return;
    }

    let mut href = None;
    let mut rel = None;
    for attr in e.attributes().flatten() {
        let Ok(value) = attr.decode_and_unescape_value(reader.decoder()) else {
            continue;
        };
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value.into_owned()),
            b"rel" => rel = Some(value.into_owned()),
            _ => {}
        }
    }

    let Some(href) = href.filter(|h| !h.trim().is_empty()) else {
        return;
    };
    let is_alternate = rel.as_deref().map_or(true, |r| r == "alternate");
    if entry.href.is_empty() || (is_alternate && !entry.href_is_alternate) {
        entry.href = href;
        entry.href_is_alternate = is_alternate;
    }
}

/// Text containing entities XML does not define (`&nbsp;`, `&eacute;`):
/// decode it as HTML instead of failing the whole feed.
fn lenient_text(e: &quick_xml::events::BytesText<'_>) -> String {
    let raw = String::from_utf8_lossy(e);
    html_escape::decode_html_entities(&raw).into_owned()
}
