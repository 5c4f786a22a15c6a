use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedUpdate};

/// Maximum number of feed ids returned by one stale-feed query
pub const OUTDATED_FEEDS_LIMIT: i64 = 500;

/// Batch size for entry inserts; 6 columns * 50 stays well under SQLite's
/// 999 parameter limit.
const ENTRY_BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    pub async fn get_feed(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(
            "SELECT id, url, title, favicon_url, updated, owned_by, autorefresh
             FROM feeds WHERE id = ? LIMIT 1",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or(DatabaseError::NotFound("feed"))
    }

    pub async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(
            "SELECT id, url, title, favicon_url, updated, owned_by, autorefresh
             FROM feeds WHERE url = ? LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(feed)
    }

    /// Ids of feeds due for refresh: `updated <= threshold` with autorefresh
    /// enabled, stalest first, at most [`OUTDATED_FEEDS_LIMIT`].
    pub async fn outdated_feeds(&self, threshold: i64) -> Result<Vec<i64>, DatabaseError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM feeds
             WHERE updated <= ? AND autorefresh = 1
             ORDER BY updated, id
             LIMIT ?",
        )
        .bind(threshold)
        .bind(OUTDATED_FEEDS_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(ids)
    }

    /// Enable or disable scheduled refresh for a feed.
    pub async fn set_autorefresh(&self, feed_id: i64, enabled: bool) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET autorefresh = ? WHERE id = ?")
            .bind(enabled)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("feed"));
        }
        Ok(())
    }

    // ========================================================================
    // Subscribe
    // ========================================================================

    /// Find-or-create the shared feed for `url` and subscribe `account_id` to it.
    ///
    /// A new feed gets `updated = 0` so its first update ingests every item
    /// currently in the document. Both inserts ignore conflicts, so concurrent
    /// calls for the same URL converge on a single feed row and a single
    /// subscription. Returns the feed id.
    pub async fn subscribe_feed(
        &self,
        account_id: i64,
        url: &str,
        title: &str,
        now: i64,
    ) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO feeds (url, title, favicon_url, updated, owned_by, autorefresh)
             VALUES (?, ?, '', 0, 0, 1)
             ON CONFLICT(url) DO NOTHING",
        )
        .bind(url)
        .bind(title)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let feed_id: i64 = sqlx::query_scalar("SELECT id FROM feeds WHERE url = ? LIMIT 1")
            .bind(url)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO subscriptions (account_id, feed_id, created)
             VALUES (?, ?, ?)
             ON CONFLICT(account_id, feed_id) DO NOTHING",
        )
        .bind(account_id)
        .bind(feed_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(feed_id)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Commit one feed update atomically: feed metadata, watermark and every
    /// entry insert.
    ///
    /// Entries already present for `(feed_id, url)` are left untouched, so
    /// replaying the same update is a no-op. If any statement fails the
    /// transaction is rolled back on drop and nothing is written.
    ///
    /// Returns the number of entries newly inserted.
    pub async fn complete_feed_update(&self, update: &FeedUpdate) -> Result<usize, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let result = sqlx::query(
            "UPDATE feeds SET title = ?, favicon_url = ?, updated = ? WHERE id = ?",
        )
        .bind(&update.title)
        .bind(&update.favicon_url)
        .bind(update.updated)
        .bind(update.feed_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("feed"));
        }

        let mut inserted: u64 = 0;
        for chunk in update.entries.chunks(ENTRY_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO entries (feed_id, title, url, published, created, word_count) ",
            );

            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(update.feed_id)
                    .push_bind(&entry.title)
                    .push_bind(&entry.url)
                    .push_bind(entry.published)
                    .push_bind(update.updated)
                    .push_bind(entry.word_count);
            });

            builder.push(" ON CONFLICT(feed_id, url) DO NOTHING");

            inserted += builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .rows_affected();
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(inserted as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewEntry;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn entry(url: &str, published: i64) -> NewEntry {
        NewEntry {
            title: format!("Entry {url}"),
            url: url.to_string(),
            published,
            word_count: 0,
        }
    }

    #[tokio::test]
    async fn test_subscribe_creates_feed_at_epoch() {
        let db = test_db().await;
        let feed_id = db
            .subscribe_feed(1, "https://example.com/feed.xml", "example.com", 1_700_000_000)
            .await
            .unwrap();

        let feed = db.get_feed(feed_id).await.unwrap();
        assert_eq!(feed.url, "https://example.com/feed.xml");
        assert_eq!(feed.title, "example.com");
        assert_eq!(feed.updated, 0);
        assert_eq!(feed.owned_by, 0);
        assert!(feed.autorefresh);
        assert!(feed.favicon_url.is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_attaches_to_same_feed() {
        let db = test_db().await;
        let url = "https://example.com/feed.xml";

        let a = db.subscribe_feed(1, url, "example.com", 1).await.unwrap();
        let b = db.subscribe_feed(2, url, "example.com", 2).await.unwrap();
        let c = db.subscribe_feed(1, url, "example.com", 3).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);

        let feeds: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feeds")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(feeds, 1);
        assert_eq!(db.subscriptions(1).await.unwrap().len(), 1);
        assert_eq!(db.subscriptions(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_feed() {
        let db = test_db().await;
        assert!(matches!(
            db.get_feed(42).await,
            Err(DatabaseError::NotFound("feed"))
        ));
    }

    #[tokio::test]
    async fn test_outdated_feeds_respects_threshold_and_autorefresh() {
        let db = test_db().await;
        let stale = db.subscribe_feed(1, "https://a.example.com/rss", "a", 0).await.unwrap();
        let fresh = db.subscribe_feed(1, "https://b.example.com/rss", "b", 0).await.unwrap();
        let disabled = db.subscribe_feed(1, "https://c.example.com/rss", "c", 0).await.unwrap();

        db.complete_feed_update(&FeedUpdate {
            feed_id: fresh,
            title: "b".into(),
            favicon_url: String::new(),
            updated: 10_000,
            entries: vec![],
        })
        .await
        .unwrap();
        db.set_autorefresh(disabled, false).await.unwrap();

        assert_eq!(db.outdated_feeds(5_000).await.unwrap(), vec![stale]);
        // Boundary is inclusive
        assert_eq!(db.outdated_feeds(10_000).await.unwrap(), vec![stale, fresh]);
    }

    #[tokio::test]
    async fn test_outdated_feeds_capped() {
        let db = test_db().await;
        for i in 0..(OUTDATED_FEEDS_LIMIT + 5) {
            db.subscribe_feed(1, &format!("https://example.com/{i}.xml"), "x", 0)
                .await
                .unwrap();
        }
        let ids = db.outdated_feeds(0).await.unwrap();
        assert_eq!(ids.len() as i64, OUTDATED_FEEDS_LIMIT);
    }

    #[tokio::test]
    async fn test_complete_feed_update_is_idempotent() {
        let db = test_db().await;
        let feed_id = db.subscribe_feed(1, "https://example.com/rss", "x", 0).await.unwrap();

        let update = FeedUpdate {
            feed_id,
            title: "Example".into(),
            favicon_url: "//example.com/favicon.ico".into(),
            updated: 2_000,
            entries: vec![
                entry("https://example.com/1", 1_000),
                entry("https://example.com/2", 1_500),
                // Same URL twice in one document
                entry("https://example.com/2", 1_500),
            ],
        };

        assert_eq!(db.complete_feed_update(&update).await.unwrap(), 2);
        assert_eq!(db.complete_feed_update(&update).await.unwrap(), 0);
        assert_eq!(db.count_entries(feed_id).await.unwrap(), 2);

        let feed = db.get_feed(feed_id).await.unwrap();
        assert_eq!(feed.title, "Example");
        assert_eq!(feed.favicon_url, "//example.com/favicon.ico");
        assert_eq!(feed.updated, 2_000);
    }

    #[tokio::test]
    async fn test_complete_feed_update_missing_feed_writes_nothing() {
        let db = test_db().await;
        let result = db
            .complete_feed_update(&FeedUpdate {
                feed_id: 99,
                title: "Ghost".into(),
                favicon_url: String::new(),
                updated: 1,
                entries: vec![entry("https://example.com/1", 1)],
            })
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound("feed"))));

        let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(entries, 0);
    }
}
