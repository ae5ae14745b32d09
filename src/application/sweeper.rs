//! Background removal of expired metadata rows.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info};

use super::repos::{CacheEntriesRepo, RepoError};

/// Shortest accepted spacing between sweeps.
const MIN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Sweeper {
    repo: Arc<dyn CacheEntriesRepo>,
    interval: Duration,
}

impl Sweeper {
    /// `interval` is clamped to at least one minute.
    pub fn new(repo: Arc<dyn CacheEntriesRepo>, interval: Duration) -> Self {
        Self {
            repo,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Delete every row that expired before now. Returns the number removed.
    pub async fn sweep_once(&self) -> Result<u64, RepoError> {
        let started = Instant::now();
        let removed = self.repo.delete_expired(OffsetDateTime::now_utc()).await?;
        metrics::histogram!("aside_sweep_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        metrics::counter!("aside_sweep_removed_total").increment(removed);

        if removed > 0 {
            info!(removed, "Removed expired cache entries");
        } else {
            debug!("No expired cache entries found");
        }
        Ok(removed)
    }

    /// Sweep now and then once per interval until `shutdown` flips to true
    /// or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.interval.as_secs(),
            "Cache sweeper started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        error!(error = %err, "Cache sweep failed");
                    }
                }
            }
        }

        info!("Cache sweeper stopped");
    }
}
