use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;

use feedsync::config::Config;
use feedsync::content::MetadataClient;
use feedsync::feed::build_http_client;
use feedsync::storage::Database;
use feedsync::sync::{FeedSync, UpdateOutcome};

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "Feed synchronization engine", version)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, short, value_name = "FILE", default_value = "feedsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe an account to a feed, then fetch it
    Subscribe { account: i64, url: String },
    /// Save a link to an account's bookmarks
    Bookmark {
        account: i64,
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value_t = 0)]
        word_count: i64,
    },
    /// Remove one of an account's subscriptions
    Unsubscribe { account: i64, subscription: i64 },
    /// Refresh a single feed
    Update { feed_id: i64 },
    /// Refresh every stale feed once
    Sweep {
        /// Select feeds updated at or before this unix time instead of the
        /// configured staleness window
        #[arg(long)]
        threshold: Option<i64>,
    },
    /// Sweep on the configured interval until Ctrl-C
    Run,
    /// List an account's newest entries
    Entries {
        account: i64,
        #[arg(long)]
        feed: Option<i64>,
    },
    /// List an account's subscriptions
    Subscriptions { account: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    tracing::debug!(config = ?config, "Configuration");

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database '{}'", config.database_path))?;

    let options = config.sync_options();
    let client = build_http_client(&options.fetch).context("Failed to build HTTP client")?;

    let mut sync = FeedSync::new(db, client.clone(), options);
    if let Some(api_url) = config.metadata_api_url.as_deref() {
        let secret = config.metadata_secret().unwrap_or_else(|| {
            tracing::warn!("Metadata service configured without a secret");
            SecretString::from(String::new())
        });
        let metadata = MetadataClient::new(client, api_url, secret)
            .context("Invalid metadata service configuration")?
            .with_timeout(sync.options().fetch.timeout);
        sync = sync.with_metadata(metadata);
    }

    match args.command {
        Command::Subscribe { account, url } => {
            let feed_id = sync
                .subscribe(account, &url)
                .await
                .with_context(|| format!("Failed to subscribe to {url}"))?;
            println!("subscribed to feed {feed_id}");
            report_update(feed_id, sync.update(feed_id).await);
        }
        Command::Bookmark {
            account,
            url,
            title,
            word_count,
        } => {
            sync.bookmark_with_word_count(account, &url, &title, word_count)
                .await
                .context("Failed to save bookmark")?;
            println!("bookmarked {url}");
        }
        Command::Unsubscribe {
            account,
            subscription,
        } => {
            let removed = sync
                .unsubscribe(subscription, account)
                .await
                .context("Failed to unsubscribe")?;
            if removed {
                println!("removed subscription {subscription}");
            } else {
                println!("no subscription {subscription} for account {account}");
            }
        }
        Command::Update { feed_id } => {
            report_update(feed_id, sync.update(feed_id).await);
        }
        Command::Sweep { threshold } => {
            let report = match threshold {
                Some(threshold) => sync.sweep(threshold).await,
                None => sync.sweep_stale().await,
            }
            .context("Sweep failed")?;
            println!(
                "selected {} updated {} skipped {} failed {} inserted {}",
                report.selected, report.updated, report.skipped, report.failed, report.inserted
            );
        }
        Command::Run => {
            sync.run_scheduler(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Cannot listen for Ctrl-C");
                }
            })
            .await;
        }
        Command::Entries { account, feed } => {
            let now = chrono::Utc::now().timestamp();
            let entries = match feed {
                Some(feed_id) => sync.db().feed_entries(account, feed_id, now).await,
                None => sync.db().account_entries(account, now).await,
            }
            .context("Failed to load entries")?;

            for entry in entries {
                let published = chrono::DateTime::from_timestamp(entry.published, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let reading_time = entry.reading_time();
                println!(
                    "{published}  [{}] {}  {}{}",
                    entry.feed_title,
                    entry.title,
                    entry.url,
                    if reading_time.is_empty() {
                        String::new()
                    } else {
                        format!("  ({reading_time})")
                    }
                );
            }
        }
        Command::Subscriptions { account } => {
            let subscriptions = sync
                .db()
                .subscriptions(account)
                .await
                .context("Failed to load subscriptions")?;
            for sub in subscriptions {
                println!("{:>6}  feed {:>6}  {}  ({})", sub.id, sub.feed_id, sub.title, sub.host());
            }
        }
    }

    Ok(())
}

fn report_update(feed_id: i64, result: Result<UpdateOutcome, feedsync::sync::SyncError>) {
    match result {
        Ok(UpdateOutcome::Updated { inserted }) => {
            println!("feed {feed_id}: {inserted} new entries");
        }
        Ok(UpdateOutcome::Skipped) => {
            println!("feed {feed_id}: update already in progress elsewhere");
        }
        Err(e) => {
            tracing::error!(feed_id = feed_id, error = %e, "Feed update failed");
            println!("feed {feed_id}: update failed: {e}");
        }
    }
}
