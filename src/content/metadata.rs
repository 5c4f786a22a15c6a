use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::feed::{read_limited_bytes, read_prefix, BodyReadError};
use crate::util::word_count;

const MAX_METADATA_SIZE: usize = 1024 * 1024; // 1MB
/// How much of a failed response body is kept for diagnostics
const MAX_ERROR_BODY: usize = 10 * 1024; // 10KB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SECRET_HEADER: &str = "Api-Secret";

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Cannot decode metadata: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid metadata service URL: {0}")]
    InvalidBaseUrl(String),
    #[error("Insecure metadata service URL: HTTPS required (except localhost)")]
    InsecureBaseUrl,
}

/// What the metadata service knows about an article.
///
/// Missing and `null` fields decode to their empty value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArticleMetadata {
    #[serde(deserialize_with = "nullable")]
    pub canonical: String,
    #[serde(rename = "img", deserialize_with = "nullable")]
    pub image: String,
    #[serde(deserialize_with = "nullable")]
    pub title: String,
    #[serde(deserialize_with = "nullable")]
    pub authors: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub keywords: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub tags: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub summary: String,
    #[serde(deserialize_with = "nullable")]
    pub text: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub published: Option<chrono::DateTime<chrono::Utc>>,
}

impl ArticleMetadata {
    pub fn word_count(&self) -> usize {
        word_count(&self.text)
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Unparsable dates are treated as absent rather than failing the document.
fn lenient_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }))
}

/// Client for the external article-metadata service.
///
/// Every request carries the shared secret in the `Api-Secret` header, so the
/// service URL must be HTTPS unless it points at the local machine.
pub struct MetadataClient {
    client: reqwest::Client,
    base_url: Url,
    secret: SecretString,
    timeout: Duration,
}

impl std::fmt::Debug for MetadataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataClient")
            .field("base_url", &self.base_url.as_str())
            .field("secret", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MetadataClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        secret: SecretString,
    ) -> Result<Self, EnrichmentError> {
        // Requests go to `{base}/?url=...`
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).map_err(|e| EnrichmentError::InvalidBaseUrl(e.to_string()))?;

        if base_url.scheme() != "https" {
            let is_localhost = matches!(base_url.host_str(), Some("127.0.0.1" | "localhost" | "[::1]"));
            if base_url.scheme() != "http" || !is_localhost {
                tracing::error!(base_url = %base_url, "Rejecting non-HTTPS metadata service URL");
                return Err(EnrichmentError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %base_url, "Using non-HTTPS metadata service URL (localhost only)");
        }

        Ok(Self {
            client,
            base_url,
            secret,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the service's metadata for `article_url`.
    pub async fn article(&self, article_url: &str) -> Result<ArticleMetadata, EnrichmentError> {
        let mut request_url = self.base_url.clone();
        request_url
            .query_pairs_mut()
            .clear()
            .append_pair("url", article_url);

        let request = self
            .client
            .get(request_url.as_str())
            .header(SECRET_HEADER, self.secret.expose_secret());

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| EnrichmentError::Timeout)?
            .map_err(EnrichmentError::Network)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = read_prefix(response, MAX_ERROR_BODY).await.unwrap_or_default();
            return Err(EnrichmentError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_METADATA_SIZE))
            .await
            .map_err(|_| EnrichmentError::Timeout)?
            .map_err(|e| match e {
                BodyReadError::TooLarge(limit) => EnrichmentError::ResponseTooLarge(limit),
                BodyReadError::Network(e) => EnrichmentError::Network(e),
            })?;

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whitespace-delimited word count of the article's extracted text.
    pub async fn word_count(&self, article_url: &str) -> Result<usize, EnrichmentError> {
        let metadata = self.article(article_url).await?;
        Ok(metadata.word_count())
    }
}
