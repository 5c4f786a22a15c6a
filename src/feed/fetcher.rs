use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, ParsedFeed};
use crate::util::validate_fetch_url;

/// Hard ceiling on a feed document body
pub const MAX_FEED_SIZE: usize = 1024 * 1024; // 1MB

/// Errors that can occur while fetching a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL failed the outbound host policy (SSRF, bad scheme, no host)
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 1MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Document could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Outbound HTTP policy shared by every fetch the engine makes.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    /// Permit loopback and private-network hosts
    pub allow_private_hosts: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            allow_private_hosts: false,
        }
    }
}

/// Fetch and parse the feed document at `url`.
///
/// The body is capped at [`MAX_FEED_SIZE`]; the whole request including the
/// body read must finish within `options.timeout`. Items come back in
/// document order.
///
/// # Errors
///
/// - [`FetchError::InvalidUrl`] - URL rejected by the host policy
/// - [`FetchError::Network`] - connection or TLS errors
/// - [`FetchError::Timeout`] - request exceeded `options.timeout`
/// - [`FetchError::HttpStatus`] - non-2xx response
/// - [`FetchError::ResponseTooLarge`] - body exceeded 1MB
/// - [`FetchError::Parse`] - not a recognizable feed document
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
) -> Result<ParsedFeed, FetchError> {
    let validated = validate_fetch_url(url, options.allow_private_hosts)
        .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

    let bytes = tokio::time::timeout(options.timeout, fetch_body(client, validated.as_str()))
        .await
        .map_err(|_| FetchError::Timeout)??;

    let now = chrono::Utc::now().timestamp();
    let feed = parse_feed(&bytes, now).map_err(|e| FetchError::Parse(e.to_string()))?;

    if feed.skipped > 0 {
        tracing::warn!(
            feed = %url,
            skipped = feed.skipped,
            "Feed items without a link skipped"
        );
    }
    tracing::debug!(
        feed = %url,
        format = ?feed.format,
        items = feed.items.len(),
        "Fetched feed"
    );

    Ok(feed)
}

async fn fetch_body(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, MAX_FEED_SIZE)
        .await
        .map_err(|e| match e {
            BodyReadError::TooLarge(_) => FetchError::ResponseTooLarge,
            BodyReadError::Network(e) => FetchError::Network(e),
        })
}

/// Failure of a size-capped body read.
#[derive(Debug, Error)]
pub(crate) enum BodyReadError {
    #[error("body exceeds {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

/// Read a whole body, failing once it grows past `limit` bytes.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyReadError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(BodyReadError::TooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyReadError::TooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Read at most `limit` bytes of a body, silently dropping the rest.
pub(crate) async fn read_prefix(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, reqwest::Error> {
    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let room = limit - bytes.len();
        if chunk.len() >= room {
            bytes.extend_from_slice(&chunk[..room]);
            break;
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
