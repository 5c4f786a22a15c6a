//! Utility functions for common operations.
//!
//! - **URL validation**: host policy applied before any outbound fetch
//! - **Text processing**: control-character stripping and word counting
//!
//! # Examples
//!
//! ```
//! use feedsync::util::{validate_fetch_url, word_count};
//!
//! let url = validate_fetch_url("https://example.com/feed.xml", false).unwrap();
//! assert_eq!(url.scheme(), "https");
//!
//! assert_eq!(word_count("three little words"), 3);
//! ```

mod text;
mod url_validator;

pub use text::{strip_control_chars, word_count};
pub use url_validator::{validate_fetch_url, UrlValidationError};
