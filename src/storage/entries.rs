use super::schema::Database;
use super::types::{DatabaseError, EntryView};

/// Maximum entries returned for an account timeline
const ACCOUNT_ENTRIES_LIMIT: i64 = 100;

/// Maximum entries returned for a single feed
const FEED_ENTRIES_LIMIT: i64 = 200;

/// Title of every account's bookmark feed
pub const BOOKMARK_FEED_TITLE: &str = "Bookmarks";

/// Icon shown for bookmark feeds
pub const BOOKMARK_FAVICON_URL: &str = "/static/bookmark.png";

/// Synthetic, account-unique URL of an account's bookmark feed.
pub fn bookmark_feed_url(account_id: i64) -> String {
    format!("/?feed={account_id}")
}

impl Database {
    // ========================================================================
    // Bookmarks
    // ========================================================================

    /// Save or update a bookmark for `account_id` in a single transaction.
    ///
    /// Creates the account's bookmark feed and subscription on first use.
    /// The entry is upserted on `(feed_id, url)`: saving the same URL again
    /// replaces its title, published time and word count.
    pub async fn upsert_bookmark(
        &self,
        account_id: i64,
        url: &str,
        title: &str,
        word_count: i64,
        now: i64,
    ) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Bookmark feeds are not fetchable, so they never autorefresh
        sqlx::query(
            "INSERT INTO feeds (url, title, favicon_url, updated, owned_by, autorefresh)
             VALUES (?, ?, ?, ?, ?, 0)
             ON CONFLICT DO NOTHING",
        )
        .bind(bookmark_feed_url(account_id))
        .bind(BOOKMARK_FEED_TITLE)
        .bind(BOOKMARK_FAVICON_URL)
        .bind(now)
        .bind(account_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let feed_id: i64 = sqlx::query_scalar("SELECT id FROM feeds WHERE owned_by = ? LIMIT 1")
            .bind(account_id)
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

        sqlx::query(
            "INSERT INTO entries (feed_id, title, url, created, published, word_count)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id, url) DO UPDATE SET
                 published = excluded.published,
                 title = excluded.title,
                 word_count = excluded.word_count",
        )
        .bind(feed_id)
        .bind(title)
        .bind(url)
        .bind(now)
        .bind(now)
        .bind(word_count)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(feed_id)
    }

    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// Newest entries across every feed `account_id` subscribes to, published
    /// at or before `published_lte`.
    pub async fn account_entries(
        &self,
        account_id: i64,
        published_lte: i64,
    ) -> Result<Vec<EntryView>, DatabaseError> {
        let entries = sqlx::query_as::<_, EntryView>(
            r#"
            SELECT
                e.id, e.feed_id, e.title, e.url, e.published, e.created, e.word_count,
                f.owned_by AS feed_owned_by,
                f.title AS feed_title,
                f.favicon_url AS feed_favicon_url
            FROM entries e
                INNER JOIN feeds f ON e.feed_id = f.id
                INNER JOIN subscriptions s ON s.feed_id = f.id
            WHERE s.account_id = ? AND e.published <= ?
            ORDER BY e.published DESC, e.id DESC
            LIMIT ?
        "#,
        )
        .bind(account_id)
        .bind(published_lte)
        .bind(ACCOUNT_ENTRIES_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(entries)
    }

    /// Newest entries of one feed, visible only if `account_id` subscribes to it.
    pub async fn feed_entries(
        &self,
        account_id: i64,
        feed_id: i64,
        published_lte: i64,
    ) -> Result<Vec<EntryView>, DatabaseError> {
        let entries = sqlx::query_as::<_, EntryView>(
            r#"
            SELECT
                e.id, e.feed_id, e.title, e.url, e.published, e.created, e.word_count,
                f.owned_by AS feed_owned_by,
                f.title AS feed_title,
                f.favicon_url AS feed_favicon_url
            FROM entries e
                INNER JOIN feeds f ON e.feed_id = f.id
                INNER JOIN subscriptions s ON s.feed_id = f.id
            WHERE s.account_id = ? AND e.published <= ? AND e.feed_id = ?
            ORDER BY e.published DESC, e.id DESC
            LIMIT ?
        "#,
        )
        .bind(account_id)
        .bind(published_lte)
        .bind(feed_id)
        .bind(FEED_ENTRIES_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(entries)
    }

    pub async fn count_entries(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(count)
    }
}
