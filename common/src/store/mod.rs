// Job store contract shared by the poller, dispatcher, producers and reaper

pub mod memory;

use crate::errors::DatabaseError;
use crate::models::{Job, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::InMemoryJobStore;

/// JobStore is the only shared mutable state of the dispatcher.
///
/// All coordination between pollers (in one process or many) is expressed as
/// conditional updates against the store; implementations must make
/// [`JobStore::claim_oldest_pending`] a compare-and-swap on the job status.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job and return its id
    async fn insert(&self, job_type: &str, payload: serde_json::Value)
        -> Result<Uuid, DatabaseError>;

    /// Insert a new `pending` job unless an identical one (same type and
    /// payload) is already pending. Returns `None` when skipped.
    async fn insert_unless_pending(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Option<Uuid>, DatabaseError>;

    /// Atomically move the oldest `pending` job of `job_type` to `processing`.
    ///
    /// Returns `None` when nothing is pending or a concurrent caller won the row.
    async fn claim_oldest_pending(&self, job_type: &str) -> Result<Option<Job>, DatabaseError>;

    /// Move a `processing` job to `completed` or `failed`.
    ///
    /// Returns `Ok(true)` when the row changed and `Ok(false)` when the job was
    /// already in the requested terminal state. Any other current state is an
    /// invalid transition.
    async fn mark_terminal(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<bool, DatabaseError>;

    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<Job>, DatabaseError>;

    async fn count_by_status(&self, job_type: &str, status: JobStatus)
        -> Result<i64, DatabaseError>;

    /// Fail every job claimed before `claimed_before` that is still `processing`
    async fn fail_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
    ) -> Result<u64, DatabaseError>;
}

/// Reject non-terminal targets before touching the store
pub(crate) fn ensure_terminal(status: JobStatus) -> Result<(), DatabaseError> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(crate::errors::ValidationError::InvalidTransition {
            from: JobStatus::Processing.to_string(),
            to: status.to_string(),
        }
        .into())
    }
}
