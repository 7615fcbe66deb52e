// Task dispatcher: one handler call per claimed job, one terminal write

use crate::errors::ExecutionError;
use crate::executor::JobExecutor;
use crate::models::{Job, JobStatus};
use crate::store::JobStore;
use crate::telemetry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// How a dispatched job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed(String),
}

/// TaskDispatcher invokes the external handler for a claimed job and records
/// the result.
///
/// There are no retries: a failed job stays failed until something enqueues a
/// fresh job, so non-idempotent handlers (publishing a post) never run twice
/// for one claim.
#[derive(Clone)]
pub struct TaskDispatcher {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn JobExecutor>,
}

impl TaskDispatcher {
    pub fn new(store: Arc<dyn JobStore>, executor: Arc<dyn JobExecutor>) -> Self {
        Self { store, executor }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    pub async fn dispatch(&self, job: Job) -> DispatchOutcome {
        let started = Instant::now();
        let result = self.executor.execute(&job).await;
        telemetry::record_dispatch_duration(&job.job_type, started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(response) => {
                info!(status = response.status, "Handler succeeded");
                telemetry::record_job_completed(&job.job_type);
                DispatchOutcome::Completed
            }
            Err(e) => {
                warn!(error = %e, "Handler failed");
                telemetry::record_job_failed(&job.job_type, failure_reason(&e));
                DispatchOutcome::Failed(e.to_string())
            }
        };

        let (status, error_text) = match &outcome {
            DispatchOutcome::Completed => (JobStatus::Completed, None),
            DispatchOutcome::Failed(message) => (JobStatus::Failed, Some(message.clone())),
        };

        // A lost write leaves the job processing until the reaper fails it
        match self.store.mark_terminal(job.id, status, error_text).await {
            Ok(true) => {}
            Ok(false) => warn!(status = %status, "Job was already terminal"),
            Err(e) => error!(error = %e, status = %status, "Failed to record job outcome"),
        }

        outcome
    }
}

fn failure_reason(err: &ExecutionError) -> &'static str {
    match err {
        ExecutionError::Timeout(_) => "timeout",
        ExecutionError::HttpRequestFailed(_) => "transport",
        ExecutionError::HandlerRejected { .. } => "rejected",
        ExecutionError::InvalidJobType(_) => "invalid_job_type",
    }
}
