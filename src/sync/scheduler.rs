use futures::StreamExt;
use std::future::Future;
use tokio::time::MissedTickBehavior;

use super::coordinator::{FeedSync, SyncError, UpdateOutcome};

/// Tally of one sweep over the stale feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub selected: usize,
    pub updated: usize,
    /// Feeds whose lock was held by another worker
    pub skipped: usize,
    pub failed: usize,
    /// Entries inserted across all updated feeds
    pub inserted: usize,
}

impl FeedSync {
    /// Update every feed last refreshed at or before `threshold` (unix seconds).
    ///
    /// Feeds are updated concurrently, at most `max_concurrent_updates` at a
    /// time. A failing feed is logged and counted; it never stops the sweep.
    /// Only the selection query itself can fail the call.
    pub async fn sweep(&self, threshold: i64) -> Result<SweepReport, SyncError> {
        let ids = self.db.outdated_feeds(threshold).await?;
        let mut report = SweepReport {
            selected: ids.len(),
            ..SweepReport::default()
        };
        if ids.is_empty() {
            tracing::debug!(threshold = threshold, "No stale feeds");
            return Ok(report);
        }

        let concurrency = self.options.max_concurrent_updates.max(1);
        let results: Vec<(i64, Result<UpdateOutcome, SyncError>)> = futures::stream::iter(ids)
            .map(|feed_id| async move { (feed_id, self.update(feed_id).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (feed_id, result) in results {
            match result {
                Ok(UpdateOutcome::Updated { inserted }) => {
                    report.updated += 1;
                    report.inserted += inserted;
                }
                Ok(UpdateOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(feed_id = feed_id, error = %e, "Feed update failed");
                }
            }
        }

        tracing::info!(
            selected = report.selected,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            inserted = report.inserted,
            "Sweep complete"
        );
        Ok(report)
    }

    /// Sweep the feeds older than the configured `stale_after`.
    pub async fn sweep_stale(&self) -> Result<SweepReport, SyncError> {
        let stale_secs = i64::try_from(self.options.stale_after.as_secs()).unwrap_or(i64::MAX);
        let threshold = chrono::Utc::now().timestamp().saturating_sub(stale_secs);
        self.sweep(threshold).await
    }

    /// Sweep every `refresh_interval` until `shutdown` resolves.
    ///
    /// The first sweep runs immediately. Shutdown during a sweep drops the
    /// in-flight updates, whose transactions roll back.
    pub async fn run_scheduler<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.options.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.options.refresh_interval.as_secs(),
            stale_after_secs = self.options.stale_after.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = &mut shutdown => break,
                result = self.sweep_stale() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Cannot select stale feeds");
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }
}
