mod entries;
mod feeds;
mod locks;
mod schema;
mod subscriptions;
mod types;

pub use entries::{bookmark_feed_url, BOOKMARK_FAVICON_URL, BOOKMARK_FEED_TITLE};
pub use feeds::OUTDATED_FEEDS_LIMIT;
pub use locks::{LockError, LockStore};
pub use schema::Database;
pub use types::{DatabaseError, EntryView, Feed, FeedUpdate, NewEntry, SubscriptionView};
