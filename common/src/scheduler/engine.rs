// Scheduler engine: one fixed-cadence polling loop per job type

use crate::config::JobTypeConfig;
use crate::executor::JobExecutor;
use crate::queue::{PollOutcome, QueuePoller};
use crate::store::JobStore;
use crate::worker::{DispatchOutcome, TaskDispatcher};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Long-running background service driven by timers
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run until [`Scheduler::stop`] is called
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Signal the service to stop; `start` returns once it has wound down
    fn stop(&self);
}

/// Polling cadence for one job type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTypeSchedule {
    pub job_type: String,
    pub interval: Duration,
}

impl From<&JobTypeConfig> for JobTypeSchedule {
    fn from(config: &JobTypeConfig) -> Self {
        Self {
            job_type: config.name.clone(),
            interval: Duration::from_secs(config.interval_seconds),
        }
    }
}

/// Poll once for `job_type` and dispatch the claimed job, if any
pub async fn run_tick(
    poller: &QueuePoller,
    dispatcher: &TaskDispatcher,
    job_type: &str,
) -> Option<DispatchOutcome> {
    match poller.poll(job_type).await {
        PollOutcome::Claimed(job) => Some(dispatcher.dispatch(job).await),
        PollOutcome::Empty => None,
    }
}

/// Main scheduler engine implementation
///
/// Every job type gets an independent loop. Each tick is spawned as its own
/// task, so a tick fires on schedule even while earlier dispatches for the
/// same type are still waiting on their handler. Claim exclusivity is left
/// entirely to the job store.
pub struct SchedulerEngine {
    schedules: Vec<JobTypeSchedule>,
    poller: QueuePoller,
    dispatcher: TaskDispatcher,
    shutdown_grace: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerEngine {
    pub fn new(
        schedules: Vec<JobTypeSchedule>,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn JobExecutor>,
        shutdown_grace: Duration,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            schedules,
            poller: QueuePoller::new(store.clone()),
            dispatcher: TaskDispatcher::new(store, executor),
            shutdown_grace,
            shutdown_tx,
        }
    }

    pub fn schedules(&self) -> &[JobTypeSchedule] {
        &self.schedules
    }

    /// Run one poll+dispatch cycle inline
    pub async fn tick(&self, job_type: &str) -> Option<DispatchOutcome> {
        run_tick(&self.poller, &self.dispatcher, job_type).await
    }

    #[instrument(skip(self, schedule), fields(job_type = %schedule.job_type))]
    async fn run_loop(&self, schedule: &JobTypeSchedule) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }

        info!(
            interval_ms = schedule.interval.as_millis() as u64,
            "Starting polling loop"
        );

        let mut ticker = interval(schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let poller = self.poller.clone();
                    let dispatcher = self.dispatcher.clone();
                    let job_type = schedule.job_type.clone();
                    in_flight.spawn(async move {
                        run_tick(&poller, &dispatcher, &job_type).await
                    });
                    debug!(in_flight = in_flight.len(), "Tick fired");
                }
                Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "Tick task panicked");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            info!(
                in_flight = in_flight.len(),
                "Waiting for in-flight dispatches"
            );
            let drained = timeout(self.shutdown_grace, async {
                while in_flight.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                // Aborted jobs stay processing until the reaper fails them
                warn!(
                    abandoned = in_flight.len(),
                    "Shutdown grace period elapsed, abandoning dispatches"
                );
                in_flight.abort_all();
            }
        }

        info!("Polling loop stopped");
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    /// Start one polling loop per job type and wait for all of them to stop
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(job_types = self.schedules.len(), "Starting scheduler engine");

        let loops = self.schedules.iter().map(|schedule| self.run_loop(schedule));
        futures::future::join_all(loops).await;

        info!("Scheduler engine stopped");
        Ok(())
    }

    fn stop(&self) {
        info!("Stopping scheduler engine");
        self.shutdown_tx.send_replace(true);
    }
}
