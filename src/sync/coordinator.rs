use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::content::MetadataClient;
use crate::feed::{fetch_feed, resolve_favicon, FaviconSource, FeedItem, FetchError, FetchOptions};
use crate::storage::{Database, DatabaseError, FeedUpdate, LockError, LockStore, NewEntry};

/// Metadata lookups in flight at once for a single feed update
const ENRICH_CONCURRENCY: usize = 4;

/// Errors surfaced by the synchronization engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The feed document could not be retrieved or parsed during an update
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    /// A URL offered for subscription does not point at a usable feed
    #[error("Invalid feed {url}: {source}")]
    Validation {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    Persistence(#[from] DatabaseError),
    /// The lock store itself failed; distinct from the lock being held
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Result of a single [`FeedSync::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update ran and committed; `inserted` entries were new
    Updated { inserted: usize },
    /// Another worker holds the feed's lock; nothing was done
    Skipped,
}

/// Runtime tuning for the engine.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How long a per-feed update lock lives; it is never released early.
    ///
    /// Also the deadline for an update's network work. A fetch still running
    /// when the lock lapses fails with [`FetchError::Timeout`]; favicon and
    /// enrichment lookups still running are abandoned and the update commits
    /// without them.
    pub lock_ttl: Duration,
    pub fetch: FetchOptions,
    pub max_concurrent_updates: usize,
    pub refresh_interval: Duration,
    /// Feeds not updated for this long are selected by the scheduler
    pub stale_after: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            fetch: FetchOptions::default(),
            max_concurrent_updates: 10,
            refresh_interval: Duration::from_secs(600),
            stale_after: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Lock key guarding updates of one feed.
pub fn lock_key(feed_id: i64) -> String {
    format!("feed-update:{feed_id}")
}

/// The feed synchronization engine.
///
/// Owns the store, the outbound HTTP client, the lock store and the optional
/// metadata client. Cheap to share behind an `Arc`; every operation takes
/// `&self`.
pub struct FeedSync {
    pub(crate) db: Database,
    pub(crate) client: reqwest::Client,
    locks: Arc<dyn LockStore>,
    metadata: Option<MetadataClient>,
    pub(crate) options: SyncOptions,
}

impl FeedSync {
    /// Engine whose locks live in the same database as the feeds.
    pub fn new(db: Database, client: reqwest::Client, options: SyncOptions) -> Self {
        let locks: Arc<dyn LockStore> = Arc::new(db.clone());
        Self {
            db,
            client,
            locks,
            metadata: None,
            options,
        }
    }

    pub fn with_lock_store(mut self, locks: Arc<dyn LockStore>) -> Self {
        self.locks = locks;
        self
    }

    /// Enable word-count enrichment of ingested entries.
    pub fn with_metadata(mut self, metadata: MetadataClient) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Refresh one feed.
    ///
    /// Takes the feed's lock, fetches the document, fills in a missing
    /// favicon, enriches every item not older than the feed's watermark and
    /// then commits the feed metadata, the new watermark and the entries in
    /// one transaction. All network I/O happens before the transaction
    /// opens; dropping the returned future at any point leaves the store
    /// untouched.
    ///
    /// Returns [`UpdateOutcome::Skipped`] when another worker holds the lock.
    /// The lock is not released on completion or failure; it expires after
    /// `lock_ttl`, which also rate-limits updates of the same feed. Network
    /// work is cut off when the lock expires so two updates of one feed never
    /// overlap.
    pub async fn update(&self, feed_id: i64) -> Result<UpdateOutcome, SyncError> {
        let key = lock_key(feed_id);
        if !self.locks.try_acquire(&key, self.options.lock_ttl).await? {
            tracing::debug!(feed_id = feed_id, "Feed update locked elsewhere, skipping");
            return Ok(UpdateOutcome::Skipped);
        }
        let deadline = tokio::time::Instant::now() + self.options.lock_ttl;

        let feed = self.db.get_feed(feed_id).await?;
        let started = chrono::Utc::now().timestamp();

        let parsed = tokio::time::timeout_at(
            deadline,
            fetch_feed(&self.client, &feed.url, &self.options.fetch),
        )
        .await
        .map_err(|_| FetchError::Timeout)??;

        let title = if parsed.title.is_empty() {
            feed.title.clone()
        } else {
            parsed.title.clone()
        };

        let mut favicon_url = feed.favicon_url.clone();
        if favicon_url.is_empty() {
            let source = FaviconSource::from_feed(&parsed, &feed.url);
            let lookup = resolve_favicon(&self.client, &source, &self.options.fetch);
            match tokio::time::timeout_at(deadline, lookup).await {
                Ok(Ok(url)) => favicon_url = url,
                Ok(Err(e)) => {
                    tracing::warn!(feed_id = feed_id, error = %e, "Cannot resolve favicon");
                }
                Err(_) => {
                    tracing::warn!(feed_id = feed_id, "Favicon lookup outlived the update lock");
                }
            }
        }

        // Items published before the previous update are not ingested, even
        // when this is the first time they are seen
        let watermark = feed.updated;
        let fresh: Vec<FeedItem> = parsed
            .items
            .into_iter()
            .filter(|item| item.published >= watermark)
            .collect();
        let considered = fresh.len();

        let entries: Vec<NewEntry> = futures::stream::iter(fresh)
            .map(|item| async move {
                let word_count = tokio::time::timeout_at(deadline, self.enrich(&item.link))
                    .await
                    .unwrap_or_else(|_| {
                        tracing::warn!(url = %item.link, "Enrichment outlived the update lock");
                        0
                    });
                NewEntry {
                    title: item.title,
                    url: item.link,
                    published: item.published,
                    word_count,
                }
            })
            .buffered(ENRICH_CONCURRENCY)
            .collect()
            .await;

        let update = FeedUpdate {
            feed_id,
            title,
            favicon_url,
            updated: started,
            entries,
        };
        let inserted = self.db.complete_feed_update(&update).await?;

        tracing::info!(
            feed_id = feed_id,
            considered = considered,
            inserted = inserted,
            "Feed updated"
        );
        Ok(UpdateOutcome::Updated { inserted })
    }

    /// Word count for an article, 0 when enrichment is off or fails.
    async fn enrich(&self, url: &str) -> i64 {
        let Some(metadata) = &self.metadata else {
            return 0;
        };

        match metadata.word_count(url).await {
            Ok(count) => i64::try_from(count).unwrap_or(i64::MAX),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cannot fetch article metadata");
                0
            }
        }
    }
}
