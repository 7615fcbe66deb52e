// Queue poller: claims at most one pending job per call

use crate::models::Job;
use crate::store::JobStore;
use crate::telemetry;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of one poll attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// This caller exclusively owns the job
    Claimed(Job),
    /// Nothing pending, lost the race, or the store was unavailable this tick
    Empty,
}

impl PollOutcome {
    pub fn into_job(self) -> Option<Job> {
        match self {
            PollOutcome::Claimed(job) => Some(job),
            PollOutcome::Empty => None,
        }
    }
}

/// QueuePoller claims jobs through the store's compare-and-swap.
///
/// There is no in-process locking; exclusivity across pollers and processes
/// comes entirely from [`JobStore::claim_oldest_pending`].
#[derive(Clone)]
pub struct QueuePoller {
    store: Arc<dyn JobStore>,
}

impl QueuePoller {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Try to claim the oldest pending job of `job_type`.
    ///
    /// Store errors are logged and reported as [`PollOutcome::Empty`]; they
    /// never escape to the schedule loop.
    #[instrument(skip(self))]
    pub async fn poll(&self, job_type: &str) -> PollOutcome {
        match self.store.claim_oldest_pending(job_type).await {
            Ok(Some(job)) => {
                debug!(job_id = %job.id, "Claimed job");
                telemetry::record_job_claimed(job_type);
                PollOutcome::Claimed(job)
            }
            Ok(None) => {
                debug!("No pending job");
                PollOutcome::Empty
            }
            Err(e) => {
                warn!(error = %e, "Failed to claim job, skipping tick");
                telemetry::record_claim_error(job_type);
                PollOutcome::Empty
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DatabaseError;
    use crate::models::JobStatus;
    use crate::store::InMemoryJobStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use uuid::Uuid;

    /// Store whose every call fails as if the database were unreachable
    struct UnreachableStore;

    #[async_trait]
    impl JobStore for UnreachableStore {
        async fn insert(&self, _: &str, _: serde_json::Value) -> Result<Uuid, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("down".to_string()))
        }
        async fn insert_unless_pending(
            &self,
            _: &str,
            _: serde_json::Value,
        ) -> Result<Option<Uuid>, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("down".to_string()))
        }
        async fn claim_oldest_pending(&self, _: &str) -> Result<Option<Job>, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("down".to_string()))
        }
        async fn mark_terminal(
            &self,
            _: Uuid,
            _: JobStatus,
            _: Option<String>,
        ) -> Result<bool, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("down".to_string()))
        }
        async fn find_by_id(&self, _: Uuid) -> Result<Option<Job>, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("down".to_string()))
        }
        async fn count_by_status(&self, _: &str, _: JobStatus) -> Result<i64, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("down".to_string()))
        }
        async fn fail_stale_processing(
            &self,
            _: DateTime<Utc>,
            _: &str,
        ) -> Result<u64, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_poll_claims_pending_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = store.insert("rankings", json!({"project_id": "p1"})).await.unwrap();
        let poller = QueuePoller::new(store.clone());

        let job = poller.poll("rankings").await.into_job().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_poll_empty_queue() {
        let poller = QueuePoller::new(Arc::new(InMemoryJobStore::new()));
        assert_eq!(poller.poll("rankings").await, PollOutcome::Empty);
    }

    #[tokio::test]
    async fn test_store_error_is_treated_as_empty() {
        let poller = QueuePoller::new(Arc::new(UnreachableStore));
        assert_eq!(poller.poll("rankings").await, PollOutcome::Empty);
    }
}
