//! Feed synchronization engine.
//!
//! Fetches RSS, Atom and JSON feeds, deduplicates their items into SQLite,
//! enriches them with word counts from an article-metadata service and keeps
//! a fleet of workers from refreshing the same feed twice through TTL locks
//! held in the shared store.

pub mod config;
pub mod content;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
