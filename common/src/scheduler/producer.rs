// Cron producers: enqueue one job per eligible project on a fixed schedule

use crate::config::ProducerConfig;
use crate::errors::{DatabaseError, ScheduleError};
use crate::models::{ProducerRunSummary, ProjectTarget};
use crate::schedule::CronTrigger;
use crate::scheduler::engine::Scheduler;
use crate::store::JobStore;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Source of projects eligible for a producer
#[async_trait]
pub trait ProjectSource: Send + Sync {
    /// Projects whose boolean `flag` is set
    async fn eligible_projects(&self, flag: &str) -> Result<Vec<ProjectTarget>, DatabaseError>;
}

/// A single producer: what to enqueue, for whom, and when
pub struct JobProducer {
    name: String,
    job_type: String,
    project_flag: String,
    dedupe: bool,
    trigger: CronTrigger,
    store: Arc<dyn JobStore>,
    projects: Arc<dyn ProjectSource>,
}

impl JobProducer {
    pub fn new(
        config: &ProducerConfig,
        store: Arc<dyn JobStore>,
        projects: Arc<dyn ProjectSource>,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            name: config.name.clone(),
            job_type: config.job_type.clone(),
            project_flag: config.project_flag.clone(),
            dedupe: config.dedupe,
            trigger: CronTrigger::new(&config.cron, &config.timezone)?,
            store,
            projects,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job for every eligible project.
    ///
    /// Inserts are independent: one failure is logged and counted, and the
    /// rest of the batch still runs. Only a failure to list projects fails
    /// the whole run.
    #[instrument(skip(self), fields(producer = %self.name, job_type = %self.job_type))]
    pub async fn run_once(&self) -> Result<ProducerRunSummary, DatabaseError> {
        let projects = self.projects.eligible_projects(&self.project_flag).await?;
        let mut summary = ProducerRunSummary {
            eligible: projects.len(),
            ..Default::default()
        };

        for project in &projects {
            let payload = project.job_payload();
            let result = if self.dedupe {
                self.store
                    .insert_unless_pending(&self.job_type, payload)
                    .await
            } else {
                self.store.insert(&self.job_type, payload).await.map(Some)
            };

            match result {
                Ok(Some(job_id)) => {
                    debug!(project_id = %project.id, job_id = %job_id, "Enqueued job");
                    summary.inserted += 1;
                }
                Ok(None) => {
                    debug!(project_id = %project.id, "Job already pending, skipped");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(project_id = %project.id, error = %e, "Failed to enqueue job");
                    summary.failed += 1;
                }
            }
        }

        telemetry::record_producer_inserted(&self.name, summary.inserted);
        telemetry::record_producer_failures(&self.name, summary.failed);
        info!(
            eligible = summary.eligible,
            inserted = summary.inserted,
            skipped = summary.skipped,
            failed = summary.failed,
            "Producer run finished"
        );

        Ok(summary)
    }

    /// Next fire time after both `now` and the last firing, so a sleep that
    /// wakes slightly before the wall-clock fire time cannot fire it twice
    fn next_fire(
        &self,
        now: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let reference = last_fired.map_or(now, |last| last.max(now));
        self.trigger.next_after(reference)
    }

    /// Sleep until each cron fire time and run, until shutdown is signalled
    async fn run_schedule(&self, mut shutdown_rx: watch::Receiver<bool>) {
        if *shutdown_rx.borrow() {
            return;
        }

        let mut last_fired = None;
        loop {
            let now = Utc::now();
            let next = match self.next_fire(now, last_fired) {
                Ok(next) => next,
                Err(e) => {
                    error!(producer = %self.name, error = %e, "Producer has no next fire time");
                    return;
                }
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(producer = %self.name, next_run = %next, "Producer sleeping");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    last_fired = Some(next);
                    if let Err(e) = self.run_once().await {
                        error!(producer = %self.name, error = %e, "Producer run failed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Runs every producer on its own cron schedule
pub struct ProducerEngine {
    producers: Vec<JobProducer>,
    shutdown_tx: watch::Sender<bool>,
}

impl ProducerEngine {
    pub fn new(producers: Vec<JobProducer>) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            producers,
            shutdown_tx,
        }
    }

    /// Build producers from configuration, skipping disabled ones
    pub fn from_config(
        configs: &[ProducerConfig],
        store: Arc<dyn JobStore>,
        projects: Arc<dyn ProjectSource>,
    ) -> Result<Self, ScheduleError> {
        let producers = configs
            .iter()
            .filter(|config| config.enabled)
            .map(|config| JobProducer::new(config, store.clone(), projects.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(producers))
    }

    pub fn producers(&self) -> &[JobProducer] {
        &self.producers
    }
}

#[async_trait]
impl Scheduler for ProducerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(producers = self.producers.len(), "Starting producer engine");

        let runs = self
            .producers
            .iter()
            .map(|producer| producer.run_schedule(self.shutdown_tx.subscribe()));
        futures::future::join_all(runs).await;

        info!("Producer engine stopped");
        Ok(())
    }

    fn stop(&self) {
        info!("Stopping producer engine");
        self.shutdown_tx.send_replace(true);
    }
}
