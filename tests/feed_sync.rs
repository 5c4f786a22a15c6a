//! Integration tests for the sync engine: subscribe, update, sweep, bookmark.
//!
//! Feeds are served by a wiremock server. Tests that race two operations
//! use a file-backed database so each worker gets its own connection.

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedsync::feed::{FetchError, FetchOptions};
use feedsync::storage::{bookmark_feed_url, Database};
use feedsync::sync::{FeedSync, SyncError, SyncOptions, UpdateOutcome};

fn options(lock_ttl: Duration) -> SyncOptions {
    SyncOptions {
        lock_ttl,
        fetch: FetchOptions {
            timeout: Duration::from_secs(5),
            allow_private_hosts: true,
        },
        ..SyncOptions::default()
    }
}

fn engine_with(db: Database, lock_ttl: Duration) -> FeedSync {
    FeedSync::new(db, reqwest::Client::new(), options(lock_ttl))
}

async fn file_db(dir: &tempfile::TempDir) -> Database {
    let path = dir.path().join("feeds.db");
    Database::open(path.to_str().unwrap()).await.unwrap()
}

/// RSS document whose channel and item links stay on the mock server, so the
/// favicon chain never leaves localhost.
fn rss(server: &MockServer, items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(slug, date)| {
            format!(
                "<item><title>Post {slug}</title><link>{}/posts/{slug}</link><pubDate>{date}</pubDate></item>",
                server.uri()
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Mock Blog</title><link>{}/</link>{items}</channel></rss>"#,
        server.uri()
    )
}

async fn serve_feed(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ============================================================================
// Subscribe + first update
// ============================================================================

#[tokio::test]
async fn test_subscribe_then_update_ingests_items() {
    let server = MockServer::start().await;
    serve_feed(
        &server,
        rss(
            &server,
            &[
                ("a", "Mon, 01 Jan 2024 00:00:00 GMT"),
                ("b", "Tue, 02 Jan 2024 00:00:00 GMT"),
            ],
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><link rel="shortcut icon" href="/img/fav.png"></head></html>"#,
        ))
        .mount(&server)
        .await;

    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_secs(30));
    let url = format!("{}/feed.xml", server.uri());

    let feed_id = sync.subscribe(1, &url).await.unwrap();
    let feed = sync.db().get_feed(feed_id).await.unwrap();
    assert_eq!(feed.title, "127.0.0.1");
    assert_eq!(feed.updated, 0);

    let outcome = sync.update(feed_id).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Updated { inserted: 2 });

    let feed = sync.db().get_feed(feed_id).await.unwrap();
    assert_eq!(feed.title, "Mock Blog");
    assert_eq!(feed.favicon_url, format!("//{}/img/fav.png", server.address()));
    assert!(feed.updated > 0);

    // Newest first
    let entries = sync.db().account_entries(1, i64::MAX).await.unwrap();
    let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Post b", "Post a"]);
    assert_eq!(entries[0].feed_title, "Mock Blog");
}

#[tokio::test]
async fn test_subscribe_unreachable_url_writes_nothing() {
    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_secs(30));
    // Port 1 is reserved and closed on test hosts
    let url = "http://127.0.0.1:1/feed.xml";

    match sync.subscribe(1, url).await {
        Err(SyncError::Validation {
            source: FetchError::Network(_),
            ..
        }) => {}
        other => panic!("Expected Validation(Network), got {:?}", other),
    }
    assert!(sync.db().find_feed_by_url(url).await.unwrap().is_none());
    assert!(sync.db().subscriptions(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subscribe_http_error_is_validation_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_secs(30));
    let result = sync.subscribe(1, &format!("{}/gone.xml", server.uri())).await;
    assert!(matches!(
        result,
        Err(SyncError::Validation {
            source: FetchError::HttpStatus(404),
            ..
        })
    ));
}

#[tokio::test]
async fn test_concurrent_subscribe_same_url_shares_one_feed() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&server, &[])).await;

    let dir = tempfile::tempdir().unwrap();
    let sync = engine_with(file_db(&dir).await, Duration::from_secs(30));
    let url = format!("{}/feed.xml", server.uri());

    let (a, b) = tokio::join!(sync.subscribe(1, &url), sync.subscribe(2, &url));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);

    assert_eq!(sync.db().subscriptions(1).await.unwrap().len(), 1);
    assert_eq!(sync.db().subscriptions(2).await.unwrap().len(), 1);
    assert_eq!(sync.db().find_feed_by_url(&url).await.unwrap().unwrap().id, a);
}

// ============================================================================
// Update: locking, deduplication, cancellation
// ============================================================================

#[tokio::test]
async fn test_concurrent_updates_run_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss(&server, &[("a", "Mon, 01 Jan 2024 00:00:00 GMT")]))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let sync = engine_with(file_db(&dir).await, Duration::from_secs(30));
    let url = format!("{}/feed.xml", server.uri());
    let feed_id = sync.db().subscribe_feed(1, &url, "t", 0).await.unwrap();

    let (first, second) = tokio::join!(sync.update(feed_id), sync.update(feed_id));
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, UpdateOutcome::Skipped));

    assert_eq!(
        outcomes,
        vec![UpdateOutcome::Updated { inserted: 1 }, UpdateOutcome::Skipped]
    );
    assert_eq!(sync.db().count_entries(feed_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_within_lock_ttl_is_skipped() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&server, &[])).await;

    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_secs(30));
    let feed_id = sync
        .db()
        .subscribe_feed(1, &format!("{}/feed.xml", server.uri()), "t", 0)
        .await
        .unwrap();

    assert!(matches!(sync.update(feed_id).await.unwrap(), UpdateOutcome::Updated { .. }));
    // The lock is never released early
    assert_eq!(sync.update(feed_id).await.unwrap(), UpdateOutcome::Skipped);
}

#[tokio::test]
async fn test_reingesting_same_document_adds_nothing() {
    let server = MockServer::start().await;
    // Dated ahead of any watermark, so only deduplication keeps them out
    serve_feed(
        &server,
        rss(
            &server,
            &[
                ("x", "Mon, 01 Jan 2035 00:00:00 GMT"),
                ("y", "Tue, 02 Jan 2035 00:00:00 GMT"),
            ],
        ),
    )
    .await;

    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_millis(300));
    let feed_id = sync
        .db()
        .subscribe_feed(1, &format!("{}/feed.xml", server.uri()), "t", 0)
        .await
        .unwrap();

    assert_eq!(
        sync.update(feed_id).await.unwrap(),
        UpdateOutcome::Updated { inserted: 2 }
    );
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        sync.update(feed_id).await.unwrap(),
        UpdateOutcome::Updated { inserted: 0 }
    );
    assert_eq!(sync.db().count_entries(feed_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_second_update_advances_watermark_only() {
    let server = MockServer::start().await;
    serve_feed(
        &server,
        rss(
            &server,
            &[
                ("a", "Mon, 01 Jan 2024 00:00:00 GMT"),
                ("b", "Tue, 02 Jan 2024 00:00:00 GMT"),
            ],
        ),
    )
    .await;

    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_millis(300));
    let feed_id = sync
        .db()
        .subscribe_feed(1, &format!("{}/feed.xml", server.uri()), "t", 0)
        .await
        .unwrap();

    sync.update(feed_id).await.unwrap();
    let first = sync.db().get_feed(feed_id).await.unwrap().updated;

    // Watermarks are whole seconds
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        sync.update(feed_id).await.unwrap(),
        UpdateOutcome::Updated { inserted: 0 }
    );

    let second = sync.db().get_feed(feed_id).await.unwrap().updated;
    assert!(second > first, "watermark {second} should pass {first}");
    assert_eq!(sync.db().count_entries(feed_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_cancelled_update_leaves_store_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss(&server, &[("a", "Mon, 01 Jan 2024 00:00:00 GMT")]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_secs(30));
    let feed_id = sync
        .db()
        .subscribe_feed(1, &format!("{}/feed.xml", server.uri()), "before", 0)
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_millis(200), sync.update(feed_id)).await;
    assert!(result.is_err());

    let feed = sync.db().get_feed(feed_id).await.unwrap();
    assert_eq!(feed.title, "before");
    assert_eq!(feed.updated, 0);
    assert_eq!(sync.db().count_entries(feed_id).await.unwrap(), 0);
}

// ============================================================================
// Sweep
// ============================================================================

#[tokio::test]
async fn test_sweep_refreshes_shared_feeds_only() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&server, &[("a", "Mon, 01 Jan 2024 00:00:00 GMT")])).await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let sync = engine_with(file_db(&dir).await, Duration::from_secs(30));
    let good = sync
        .db()
        .subscribe_feed(1, &format!("{}/feed.xml", server.uri()), "t", 0)
        .await
        .unwrap();
    sync.db()
        .subscribe_feed(1, &format!("{}/broken.xml", server.uri()), "t", 0)
        .await
        .unwrap();
    sync.bookmark(1, "https://example.com/saved", "Saved").await.unwrap();

    let report = sync.sweep_stale().await.unwrap();
    assert_eq!(report.selected, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(sync.db().count_entries(good).await.unwrap(), 1);

    // Freshly updated feeds are no longer stale; the failed one still is
    let report = sync.sweep_stale().await.unwrap();
    assert_eq!(report.selected, 1);
}

// ============================================================================
// Bookmarks
// ============================================================================

#[tokio::test]
async fn test_bookmark_same_url_twice_keeps_one_entry() {
    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_secs(30));

    sync.bookmark(5, "https://example.com/article", "First title").await.unwrap();
    sync.bookmark(5, "https://example.com/article", "Second title").await.unwrap();

    let entries = sync.db().account_entries(5, i64::MAX).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title, "Second title");

    let feed = sync
        .db()
        .find_feed_by_url(&bookmark_feed_url(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entries[0].feed_id, feed.id);
    assert_eq!(sync.db().subscriptions(5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bookmarks_are_private_per_account() {
    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_secs(30));

    sync.bookmark(1, "https://example.com/a", "A").await.unwrap();
    sync.bookmark(2, "https://example.com/a", "A").await.unwrap();

    let one = sync.db().account_entries(1, i64::MAX).await.unwrap();
    let two = sync.db().account_entries(2, i64::MAX).await.unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(two.len(), 1);
    assert_ne!(one[0].feed_id, two[0].feed_id);
}

#[tokio::test]
async fn test_unsubscribe_hides_entries_but_keeps_feed() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&server, &[("a", "Mon, 01 Jan 2024 00:00:00 GMT")])).await;

    let sync = engine_with(Database::open(":memory:").await.unwrap(), Duration::from_secs(30));
    let url = format!("{}/feed.xml", server.uri());
    let feed_id = sync.subscribe(1, &url).await.unwrap();
    sync.update(feed_id).await.unwrap();
    assert_eq!(sync.db().account_entries(1, i64::MAX).await.unwrap().len(), 1);

    let sub = sync.db().subscriptions(1).await.unwrap()[0].id;
    // Another account cannot remove it
    assert!(!sync.unsubscribe(sub, 2).await.unwrap());
    assert!(sync.unsubscribe(sub, 1).await.unwrap());

    assert!(sync.db().account_entries(1, i64::MAX).await.unwrap().is_empty());
    assert_eq!(sync.db().count_entries(feed_id).await.unwrap(), 1);
}
