// Stale-claim reaper and queue depth reporting

use crate::config::ReaperConfig;
use crate::models::JobStatus;
use crate::scheduler::engine::Scheduler;
use crate::store::JobStore;
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperSettings {
    /// `None` turns stale-claim reaping off; depth reporting still runs
    pub stale_after: Option<Duration>,
    pub interval: Duration,
}

impl From<&ReaperConfig> for ReaperSettings {
    fn from(config: &ReaperConfig) -> Self {
        Self {
            stale_after: (config.stale_after_seconds > 0)
                .then(|| Duration::from_secs(config.stale_after_seconds)),
            interval: Duration::from_secs(config.interval_seconds.max(1)),
        }
    }
}

/// Reaper fails jobs stuck in `processing` (a worker died mid-dispatch or a
/// terminal write was lost). It never puts a job back to `pending`, so no
/// handler is ever invoked twice for the same job.
pub struct Reaper {
    settings: ReaperSettings,
    job_types: Vec<String>,
    store: Arc<dyn JobStore>,
    shutdown_tx: watch::Sender<bool>,
}

impl Reaper {
    pub fn new(settings: ReaperSettings, job_types: Vec<String>, store: Arc<dyn JobStore>) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            settings,
            job_types,
            store,
            shutdown_tx,
        }
    }

    /// One maintenance pass; returns the number of jobs failed
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> u64 {
        let mut reaped = 0;

        if let Some(stale_after) = self.settings.stale_after {
            let cutoff = chrono::Duration::from_std(stale_after)
                .map(|age| Utc::now() - age)
                .unwrap_or_else(|_| Utc::now());
            let message = format!(
                "Job exceeded {}s in processing without a recorded outcome",
                stale_after.as_secs()
            );

            match self.store.fail_stale_processing(cutoff, &message).await {
                Ok(0) => debug!("No stale jobs"),
                Ok(count) => {
                    warn!(count = count, "Failed stale processing jobs");
                    telemetry::record_jobs_reaped(count);
                    reaped = count;
                }
                Err(e) => warn!(error = %e, "Failed to reap stale jobs"),
            }
        }

        for job_type in &self.job_types {
            match self.store.count_by_status(job_type, JobStatus::Pending).await {
                Ok(depth) => telemetry::update_queue_depth(job_type, depth),
                Err(e) => debug!(job_type = %job_type, error = %e, "Failed to read queue depth"),
            }
        }

        reaped
    }
}

#[async_trait]
impl Scheduler for Reaper {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        info!(
            stale_after_seconds = self.settings.stale_after.map(|d| d.as_secs()),
            interval_seconds = self.settings.interval.as_secs(),
            "Starting reaper"
        );

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reaper stopped");
        Ok(())
    }

    fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
