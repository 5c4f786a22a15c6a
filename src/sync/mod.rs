//! The feed synchronization engine.
//!
//! [`FeedSync`] ties the store, the lock store, the fetcher and the metadata
//! client together:
//!
//! - [`FeedSync::update`] refreshes one feed under a TTL lock
//! - [`FeedSync::sweep`] and [`FeedSync::run_scheduler`] refresh stale feeds
//!   through a bounded pool
//! - [`FeedSync::subscribe`], [`FeedSync::bookmark`] and
//!   [`FeedSync::unsubscribe`] onboard and detach accounts
//!
//! # Example
//!
//! ```ignore
//! use feedsync::storage::Database;
//! use feedsync::sync::{FeedSync, SyncOptions};
//!
//! let db = Database::open("feeds.db").await?;
//! let sync = FeedSync::new(db, reqwest::Client::new(), SyncOptions::default());
//! let feed_id = sync.subscribe(1, "https://example.com/rss").await?;
//! sync.update(feed_id).await?;
//! ```

mod coordinator;
mod scheduler;
mod subscriptions;

pub use coordinator::{lock_key, FeedSync, SyncError, SyncOptions, UpdateOutcome};
pub use scheduler::SweepReport;
