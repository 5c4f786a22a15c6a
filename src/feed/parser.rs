use feed_rs::model::{FeedType, Link};
use feed_rs::parser;

use crate::util::strip_control_chars;

/// Syndication format the document was detected as.
///
/// Informational only: every format is reduced to the same [`ParsedFeed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Atom,
    Rss,
    Json,
}

impl From<&FeedType> for FeedFormat {
    fn from(feed_type: &FeedType) -> Self {
        match feed_type {
            FeedType::Atom => FeedFormat::Atom,
            FeedType::JSON => FeedFormat::Json,
            FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2 => FeedFormat::Rss,
        }
    }
}

/// One item of a feed document, reduced to what ingestion needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    /// Unix seconds: published, else updated, else the parse time
    pub published: i64,
}

/// A parsed feed document, items in document order.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    pub title: String,
    /// The site the feed belongs to, if the document names one
    pub link: Option<String>,
    pub items: Vec<FeedItem>,
    /// Items dropped because they carried no link
    pub skipped: usize,
}

impl ParsedFeed {
    pub fn first_item_link(&self) -> Option<&str> {
        self.items.first().map(|item| item.link.as_str())
    }
}

/// Parse an RSS, Atom or JSON Feed document.
///
/// `now` is the unix time used for items that carry no date at all.
pub fn parse_feed(bytes: &[u8], now: i64) -> Result<ParsedFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let title = feed
        .title
        .map(|t| strip_control_chars(t.content.trim()).into_owned())
        .unwrap_or_default();
    let link = primary_link(&feed.links).map(normalize_link);

    let mut skipped = 0;
    let items: Vec<FeedItem> = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let Some(link) = primary_link(&entry.links).map(normalize_link) else {
                skipped += 1;
                return None;
            };
            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp())
                .unwrap_or(now);
            let title = entry
                .title
                .map(|t| strip_control_chars(t.content.trim()).into_owned())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            Some(FeedItem {
                title,
                link,
                published,
            })
        })
        .collect();

    Ok(ParsedFeed {
        format: FeedFormat::from(&feed.feed_type),
        title,
        link,
        items,
        skipped,
    })
}

/// The alternate (HTML) link, falling back to the first non-self link.
fn primary_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.iter().find(|l| l.rel.as_deref() != Some("self")))
        .map(|l| l.href.trim())
        .filter(|href| !href.is_empty())
}

/// Give protocol-relative links (`//host/path`) an explicit https scheme.
pub(crate) fn normalize_link(href: &str) -> String {
    if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    }
}
