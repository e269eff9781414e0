//! # Retention Sweeper
//!
//! Removes completed and failed jobs once they are older than the retention
//! window. Runs after every job and on a background tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::repositories::sync_job::JobStore;

/// Deletes terminal jobs older than the configured TTL
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: Arc<JobStore>,
    ttl: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<JobStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Sweep against the current clock. Returns the number of jobs removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let removed = self.store.delete_where(|job| {
            job.status.is_terminal()
                && (now - job.retention_anchor())
                    .to_std()
                    .is_ok_and(|age| age > ttl)
        });

        if removed > 0 {
            counter!("sync_jobs_swept_total").increment(removed as u64);
            debug!(removed, ttl_seconds = ttl.as_secs(), "Swept expired sync jobs");
        }
        removed
    }

    /// Sweep every `interval` until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!(
            interval_seconds = interval.as_secs(),
            ttl_seconds = self.ttl.as_secs(),
            "Starting retention sweeper"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retention sweeper shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    self.sweep();
                }
            }
        }

        info!("Retention sweeper stopped");
    }
}
