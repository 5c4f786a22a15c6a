//! Expiring locks shared across processes.
//!
//! A lock is a row in the `locks` table holding its expiry time. Acquiring
//! is a single statement that inserts the row, or takes over an expired one,
//! so two workers can never both succeed within one TTL window. Locks are
//! never released explicitly; a crashed holder's lock simply lapses.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::schema::Database;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Set-if-absent with expiry, the only primitive the engine needs from a
/// shared fast store.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Try to take `key` for `ttl`.
    ///
    /// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if another
    /// holder's lock has not expired yet.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError>;
}

#[async_trait]
impl LockStore for Database {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = now_ms.saturating_add(ttl_ms);

        let result = sqlx::query(
            "INSERT INTO locks (key, expires_at_ms) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET expires_at_ms = excluded.expires_at_ms
             WHERE locks.expires_at_ms <= ?",
        )
        .bind(key)
        .bind(expires_at_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Unavailable(Box::new(e)))?;

        let acquired = result.rows_affected() == 1;
        tracing::trace!(key = %key, acquired, "Lock attempt");
        Ok(acquired)
    }
}
