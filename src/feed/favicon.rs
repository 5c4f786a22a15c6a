use thiserror::Error;
use url::Url;

use super::fetcher::{read_prefix, FetchOptions};
use super::parser::ParsedFeed;
use crate::util::validate_fetch_url;

/// Only the head of a site page is scanned for icon links
const MAX_PAGE_SIZE: usize = 200 * 1024; // 200KB
/// Bytes of a guessed `/favicon.ico` inspected for an image signature
const SNIFF_LEN: usize = 128;
const FALLBACK_SERVICE: &str = "//www.google.com/s2/favicons?domain_url=";

/// Where a feed's icon may be found.
#[derive(Debug, Clone, Default)]
pub struct FaviconSource {
    /// The site link declared by the feed document
    pub link: Option<String>,
    pub first_item_link: Option<String>,
    pub feed_url: String,
}

impl FaviconSource {
    pub fn from_feed(feed: &ParsedFeed, feed_url: &str) -> Self {
        Self {
            link: feed.link.clone(),
            first_item_link: feed.first_item_link().map(str::to_owned),
            feed_url: feed_url.to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FaviconError {
    #[error("no usable site URL to derive a favicon for {0}")]
    Unresolvable(String),
}

/// Find an icon URL for a feed.
///
/// Tries, in order: a `<link rel="icon">` on the site page (the feed's link,
/// else its first item's link), a `/favicon.ico` that sniffs as an image,
/// and finally a third-party favicon service URL built without any request.
/// Results are scheme-relative (`//host/path`).
///
/// Fails only when none of the source URLs has a host.
pub async fn resolve_favicon(
    client: &reqwest::Client,
    source: &FaviconSource,
    options: &FetchOptions,
) -> Result<String, FaviconError> {
    let page_candidates = [source.link.as_deref(), source.first_item_link.as_deref()];

    let mut reached: Option<Url> = None;
    for candidate in page_candidates.into_iter().flatten() {
        let Some(page_url) = parse_with_default_scheme(candidate) else {
            continue;
        };
        if let Err(e) = validate_fetch_url(page_url.as_str(), options.allow_private_hosts) {
            tracing::debug!(url = %page_url, error = %e, "Skipping favicon page candidate");
            continue;
        }

        if let Some((final_url, html)) = fetch_page(client, &page_url, options).await {
            if let Some(icon) = find_icon_link_in_html(&html, &final_url) {
                return Ok(icon);
            }
            reached = Some(final_url);
            break;
        }
    }

    let origin = reached
        .or_else(|| {
            [
                Some(source.feed_url.as_str()),
                source.link.as_deref(),
                source.first_item_link.as_deref(),
            ]
            .into_iter()
            .flatten()
            .find_map(parse_with_default_scheme)
        })
        .ok_or_else(|| FaviconError::Unresolvable(source.feed_url.clone()))?;

    let mut guess = origin.clone();
    guess.set_path("/favicon.ico");
    guess.set_query(None);
    guess.set_fragment(None);
    if image_exists(client, &guess, options).await {
        return Ok(without_scheme(&guess));
    }

    Ok(format!(
        "{FALLBACK_SERVICE}{}",
        origin.origin().ascii_serialization()
    ))
}

/// Parse a site link, assuming `http` when it has no scheme.
///
/// Only http(s) URLs with a host qualify.
fn parse_with_default_scheme(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let with_scheme = if raw.starts_with("//") {
                format!("http:{raw}")
            } else {
                format!("http://{raw}")
            };
            Url::parse(&with_scheme).ok()?
        }
        Err(_) => return None,
    };

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed)
}

async fn fetch_page(
    client: &reqwest::Client,
    url: &Url,
    options: &FetchOptions,
) -> Option<(Url, String)> {
    match tokio::time::timeout(options.timeout, get_page(client, url)).await {
        Ok(Ok(page)) => Some(page),
        Ok(Err(e)) => {
            tracing::debug!(url = %url, error = %e, "Favicon page fetch failed");
            None
        }
        Err(_) => {
            tracing::debug!(url = %url, "Favicon page fetch timed out");
            None
        }
    }
}

async fn get_page(client: &reqwest::Client, url: &Url) -> Result<(Url, String), reqwest::Error> {
    let response = client.get(url.as_str()).send().await?;
    // Redirects are followed; relative icon links resolve against the final page
    let final_url = response.url().clone();
    let bytes = read_prefix(response, MAX_PAGE_SIZE).await?;
    Ok((final_url, String::from_utf8_lossy(&bytes).into_owned()))
}

async fn image_exists(client: &reqwest::Client, url: &Url, options: &FetchOptions) -> bool {
    if validate_fetch_url(url.as_str(), options.allow_private_hosts).is_err() {
        return false;
    }

    let head = match tokio::time::timeout(options.timeout, get_head(client, url)).await {
        Ok(Ok(Some(head))) => head,
        Ok(Ok(None)) | Err(_) => return false,
        Ok(Err(e)) => {
            tracing::debug!(url = %url, error = %e, "Favicon probe failed");
            return false;
        }
    };

    if sniff_image_type(&head).is_none() {
        tracing::debug!(url = %url, "Guessed favicon is not an image");
        return false;
    }
    true
}

/// First bytes of a 200 response, `None` for any other status.
async fn get_head(client: &reqwest::Client, url: &Url) -> Result<Option<Vec<u8>>, reqwest::Error> {
    let response = client.get(url.as_str()).send().await?;
    if response.status() != reqwest::StatusCode::OK {
        return Ok(None);
    }
    read_prefix(response, SNIFF_LEN).await.map(Some)
}

/// Identify an image by its leading bytes.
///
/// Recognizes the formats browsers accept as favicons: PNG, JPEG, GIF, BMP
/// and ICO (including cursor resources).
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"\x00\x00\x01\x00", "image/x-icon"),
        (b"\x00\x00\x02\x00", "image/x-icon"),
    ];

    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, mime)| *mime)
}

/// Scans HTML for a `<link>` whose `rel` mentions `icon`.
///
/// Uses simple string scanning (no HTML parser dependency). The href is
/// resolved against `page_url` and returned scheme-relative; hrefs that
/// point at a site root rather than a file are ignored.
fn find_icon_link_in_html(html: &str, page_url: &Url) -> Option<String> {
    // ASCII lowering keeps byte offsets aligned with the original text
    let html_lower = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];

        let tag_end = match remaining.find('>') {
            Some(pos) => pos,
            None => break,
        };
        search_from = abs_start + tag_end + 1;

        let tag = &remaining[..=tag_end];
        let is_icon = extract_attr_value(tag, "rel")
            .is_some_and(|rel| rel.split_whitespace().any(|r| r.contains("icon")));
        if !is_icon {
            continue;
        }

        // Extract href from the original HTML to preserve URL case
        let original_tag = &html[abs_start..=abs_start + tag_end];
        let Some(href) = extract_attr_value(original_tag, "href").map(str::trim) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }

        let Ok(resolved) = page_url.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") || resolved.host_str().is_none() {
            continue;
        }
        if resolved.path().is_empty() || resolved.path() == "/" {
            continue;
        }

        return Some(without_scheme(&resolved));
    }

    None
}

/// Extracts an attribute value from a tag (quoted or bare).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let attr_prefix = format!("{attr_name}=");

    // The name must start a new attribute, so `data-href=` is not `href=`
    let mut from = 0;
    let attr_start = loop {
        let pos = from + tag_lower[from..].find(&attr_prefix)?;
        if tag_lower[..pos].ends_with(|c: char| c.is_ascii_whitespace()) {
            break pos;
        }
        from = pos + attr_prefix.len();
    };

    let rest = &tag[attr_start + attr_prefix.len()..];
    match rest.as_bytes().first()? {
        quote @ (b'"' | b'\'') => {
            let inner = &rest[1..];
            let end = inner.find(*quote as char)?;
            Some(&inner[..end])
        }
        _ => {
            let end = rest
                .find(|c: char| c.is_ascii_whitespace() || c == '>')
                .unwrap_or(rest.len());
            Some(rest[..end].trim_end_matches('/'))
        }
    }
}

/// `https://host/path` -> `//host/path`
fn without_scheme(url: &Url) -> String {
    url.as_str()[url.scheme().len() + 1..].to_owned()
}
