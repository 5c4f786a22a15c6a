use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Persistence errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLite reported lock contention that outlasted the busy timeout
    #[error("Database is busy: {0}")]
    Busy(sqlx::Error),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A row that the operation depends on does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, separating lock contention from other failures.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return DatabaseError::Busy(err);
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed row.
///
/// `updated` is the ingestion watermark in unix seconds: entries published
/// before it are not ingested. `owned_by == 0` marks a shared feed; any
/// other value is the account owning a bookmark feed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub favicon_url: String,
    pub updated: i64,
    pub owned_by: i64,
    pub autorefresh: bool,
}

/// An entry ready to be inserted by a feed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub title: String,
    pub url: String,
    pub published: i64,
    pub word_count: i64,
}

/// Everything one successful feed update writes, committed as a unit by
/// [`Database::complete_feed_update`](super::Database::complete_feed_update).
#[derive(Debug, Clone)]
pub struct FeedUpdate {
    pub feed_id: i64,
    pub title: String,
    pub favicon_url: String,
    /// New watermark: the time the fetch started
    pub updated: i64,
    pub entries: Vec<NewEntry>,
}

/// Entry joined with the feed it belongs to, as listed to an account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntryView {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub feed_favicon_url: String,
    pub feed_owned_by: i64,
    pub title: String,
    pub url: String,
    pub published: i64,
    pub created: i64,
    pub word_count: i64,
}

/// Average reading speed used for [`EntryView::reading_time`]
const WORDS_PER_MINUTE: i64 = 200;

impl EntryView {
    /// Host part of the entry URL, or an empty string if the URL does not parse.
    pub fn url_host(&self) -> String {
        host_of(&self.url)
    }

    /// Estimated reading time; empty when the word count is unknown.
    pub fn reading_time(&self) -> String {
        if self.word_count <= 0 {
            return String::new();
        }
        match self.word_count / WORDS_PER_MINUTE {
            0 => "less than 1 minute".to_string(),
            1 => "1 minute".to_string(),
            m if m > 20 => "more than 20 minutes".to_string(),
            m => format!("{m} minutes"),
        }
    }
}

/// Subscription joined with its feed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionView {
    pub id: i64,
    pub feed_id: i64,
    pub account_id: i64,
    pub title: String,
    pub url: String,
    pub created: i64,
    pub updated: i64,
    pub feed_owned_by: i64,
    pub feed_favicon_url: String,
}

impl SubscriptionView {
    pub fn host(&self) -> String {
        host_of(&self.url)
    }
}

fn host_of(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_default()
}
