use super::coordinator::{FeedSync, SyncError};
use crate::feed::fetch_feed;
use crate::util::strip_control_chars;

impl FeedSync {
    /// Subscribe `account_id` to the feed at `url`, creating the feed if needed.
    ///
    /// The URL is fetched first; if it does not serve a parsable feed the
    /// call fails with [`SyncError::Validation`] and nothing is written. A new
    /// feed is titled with the URL's host until its first update and starts
    /// with a zero watermark. Returns the feed id. No update is triggered.
    pub async fn subscribe(&self, account_id: i64, url: &str) -> Result<i64, SyncError> {
        let url = url.trim();

        if let Err(source) = fetch_feed(&self.client, url, &self.options.fetch).await {
            tracing::info!(account_id = account_id, url = %url, error = %source, "Rejected subscription");
            return Err(SyncError::Validation {
                url: url.to_owned(),
                source,
            });
        }

        let title = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_else(|| url.to_owned());
        let now = chrono::Utc::now().timestamp();

        let feed_id = self.db.subscribe_feed(account_id, url, &title, now).await?;
        tracing::info!(account_id = account_id, feed_id = feed_id, url = %url, "Subscribed");
        Ok(feed_id)
    }

    /// Save `url` to the account's bookmark feed with no word count.
    ///
    /// See [`FeedSync::bookmark_with_word_count`].
    pub async fn bookmark(&self, account_id: i64, url: &str, title: &str) -> Result<(), SyncError> {
        self.bookmark_with_word_count(account_id, url, title, 0).await
    }

    /// Save or update a bookmark.
    ///
    /// The account's private bookmark feed and its subscription are created
    /// on first use. Saving a URL that is already bookmarked replaces its
    /// title, word count and published time. An empty title falls back to
    /// the URL. Bookmarks are never enriched.
    pub async fn bookmark_with_word_count(
        &self,
        account_id: i64,
        url: &str,
        title: &str,
        word_count: i64,
    ) -> Result<(), SyncError> {
        let url = url.trim();
        let title = strip_control_chars(title.trim());
        let title = if title.is_empty() { url } else { &*title };
        let now = chrono::Utc::now().timestamp();

        let feed_id = self
            .db
            .upsert_bookmark(account_id, url, title, word_count, now)
            .await?;
        tracing::debug!(account_id = account_id, feed_id = feed_id, url = %url, "Bookmark saved");
        Ok(())
    }

    /// Remove a subscription belonging to `account_id`.
    ///
    /// Returns `false` when nothing was removed. The feed and its entries are
    /// kept.
    pub async fn unsubscribe(&self, subscription_id: i64, account_id: i64) -> Result<bool, SyncError> {
        let removed = self.db.unsubscribe(subscription_id, account_id).await?;
        tracing::info!(
            account_id = account_id,
            subscription_id = subscription_id,
            removed = removed,
            "Unsubscribe"
        );
        Ok(removed)
    }
}
