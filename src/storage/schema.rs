use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the relational store shared by every worker.
///
/// Cheap to clone: all clones share one connection pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// `path` is a file path or `:memory:`. In-memory databases are shared
    /// by all connections of the pool.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: workers contending for the write lock wait up to
        // 5 seconds before SQLITE_BUSY surfaces. Set via pragma() so every
        // connection in the pool inherits it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Feeds. `updated` is the ingestion watermark (unix seconds),
        // `owned_by` = 0 for shared feeds, account id for bookmark feeds.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                favicon_url TEXT NOT NULL DEFAULT '',
                updated INTEGER NOT NULL,
                owned_by INTEGER NOT NULL DEFAULT 0,
                autorefresh INTEGER NOT NULL DEFAULT 1
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // At most one bookmark feed per account
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_feeds_owner ON feeds(owned_by) WHERE owned_by != 0",
        )
        .execute(&mut *tx)
        .await?;

        // Stale-feed selection filters on autorefresh and orders by updated
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_outdated ON feeds(autorefresh, updated)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                created INTEGER NOT NULL,
                UNIQUE(account_id, feed_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Entries. For bookmarks `published` equals `created`.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                created INTEGER NOT NULL,
                published INTEGER NOT NULL,
                word_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE(feed_id, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_feed_published ON entries(feed_id, published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Expiring locks shared by every process using this database
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                key TEXT PRIMARY KEY,
                expires_at_ms INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
