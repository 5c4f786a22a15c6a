use super::schema::Database;
use super::types::{DatabaseError, SubscriptionView};

const SUBSCRIPTIONS_LIMIT: i64 = 1000;

impl Database {
    /// Subscriptions of `account_id`, ordered by feed title.
    pub async fn subscriptions(&self, account_id: i64) -> Result<Vec<SubscriptionView>, DatabaseError> {
        let subs = sqlx::query_as::<_, SubscriptionView>(
            r#"
            SELECT
                s.id, s.feed_id, s.account_id, s.created,
                f.title, f.url, f.updated,
                f.owned_by AS feed_owned_by,
                f.favicon_url AS feed_favicon_url
            FROM subscriptions s
                INNER JOIN feeds f ON s.feed_id = f.id
            WHERE s.account_id = ?
            ORDER BY f.title ASC
            LIMIT ?
        "#,
        )
        .bind(account_id)
        .bind(SUBSCRIPTIONS_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(subs)
    }

    /// Delete a subscription owned by `account_id`.
    ///
    /// The feed and its entries stay. Returns `false` when no row matched,
    /// including when the subscription belongs to another account.
    pub async fn unsubscribe(&self, subscription_id: i64, account_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE account_id = ? AND id = ?")
            .bind(account_id)
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}
