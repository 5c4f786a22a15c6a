//! Retrieval side of feed synchronization.
//!
//! - [`parser`] - reduce RSS, Atom and JSON Feed documents to one item shape
//! - [`fetcher`] - bounded, timed HTTP retrieval of a feed document
//! - [`favicon`] - heuristic discovery of a feed's icon
//! - [`client`] - the shared HTTP client and its redirect policy
//!
//! # Example
//!
//! ```ignore
//! use feedsync::feed::{fetch_feed, resolve_favicon, FaviconSource, FetchOptions};
//!
//! let options = FetchOptions::default();
//! let feed = fetch_feed(&client, "https://example.com/rss", &options).await?;
//! let icon = resolve_favicon(&client, &FaviconSource::from_feed(&feed, url), &options).await?;
//! ```

mod client;
mod favicon;
mod fetcher;
mod parser;

pub use client::build_http_client;
pub use favicon::{resolve_favicon, sniff_image_type, FaviconError, FaviconSource};
pub use fetcher::{fetch_feed, FetchError, FetchOptions, MAX_FEED_SIZE};
pub(crate) use fetcher::{read_limited_bytes, read_prefix, BodyReadError};
pub use parser::{parse_feed, FeedFormat, FeedItem, ParsedFeed};
