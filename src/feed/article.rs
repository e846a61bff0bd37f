use super::source::FeedSource;

/// A normalized headline ready for deduplication and delivery.
///
/// Only the parser constructs these, and it never does so with an empty
/// `guid`, `title` or `link`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// Deduplication key, stable across fetches of the same item.
    pub guid: String,
    pub title: String,
    pub link: String,
    /// Tag of the source the article came from.
    pub header: String,
    pub topic: Option<String>,
    pub source: Option<String>,
}

impl Article {
    /// Builds an article from trimmed fields, returning `None` when any of
    /// the required ones is blank.
    pub(crate) fn from_parts(feed: &FeedSource, guid: &str, title: &str, link: &str) -> Option<Self> {
        let (guid, title, link) = (guid.trim(), title.trim(), link.trim());
        if guid.is_empty() || title.is_empty() || link.is_empty() {
            return None;
        }

        Some(Self {
            guid: guid.to_string(),
            title: title.to_string(),
            link: link.to_string(),
            header: feed.header.clone(),
            topic: feed.topic.clone(),
            source: feed.source.clone(),
        })
    }
}
