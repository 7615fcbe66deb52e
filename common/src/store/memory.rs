// In-process job store used by tests and single-node development runs

use super::{ensure_terminal, JobStore};
use crate::errors::{DatabaseError, ValidationError};
use crate::models::{Job, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

/// Job store backed by a vector behind an async mutex.
///
/// The mutex makes every operation atomic, which gives the same claim
/// exclusivity the PostgreSQL store gets from its conditional update.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed job, keeping its timestamps and status
    pub async fn insert_job(&self, job: Job) {
        self.jobs.lock().await.push(job);
    }

    /// Snapshot of every job in insertion order
    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, DatabaseError> {
        let job = Job::new_pending(job_type, payload);
        let id = job.id;
        self.jobs.lock().await.push(job);
        Ok(id)
    }

    async fn insert_unless_pending(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Option<Uuid>, DatabaseError> {
        let mut jobs = self.jobs.lock().await;
        let duplicate = jobs.iter().any(|job| {
            job.status == JobStatus::Pending && job.job_type == job_type && job.payload == payload
        });
        if duplicate {
            return Ok(None);
        }

        let job = Job::new_pending(job_type, payload);
        let id = job.id;
        jobs.push(job);
        Ok(Some(id))
    }

    #[instrument(skip(self))]
    async fn claim_oldest_pending(&self, job_type: &str) -> Result<Option<Job>, DatabaseError> {
        let mut jobs = self.jobs.lock().await;

        // Ties on created_at fall back to insertion order
        let oldest = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.status == JobStatus::Pending && job.job_type == job_type)
            .min_by_key(|(index, job)| (job.created_at, *index))
            .map(|(index, _)| index);

        Ok(oldest.map(|index| {
            let job = &mut jobs[index];
            job.status = JobStatus::Processing;
            job.claimed_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn mark_terminal(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<bool, DatabaseError> {
        ensure_terminal(status)?;

        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("Job not found: {}", job_id)))?;

        if job.status == status {
            return Ok(false);
        }
        if !job.status.can_transition_to(status) {
            return Err(ValidationError::InvalidTransition {
                from: job.status.to_string(),
                to: status.to_string(),
            }
            .into());
        }

        job.status = status;
        job.completed_at = Some(Utc::now());
        job.error = match status {
            JobStatus::Failed => error,
            _ => None,
        };
        Ok(true)
    }

    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<Job>, DatabaseError> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .find(|job| job.id == job_id)
            .cloned())
    }

    async fn count_by_status(
        &self,
        job_type: &str,
        status: JobStatus,
    ) -> Result<i64, DatabaseError> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.job_type == job_type && job.status == status)
            .count() as i64)
    }

    async fn fail_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
    ) -> Result<u64, DatabaseError> {
        let now = Utc::now();
        let mut reaped = 0;
        for job in self.jobs.lock().await.iter_mut() {
            let stale = job.status == JobStatus::Processing
                && job.claimed_at.is_some_and(|claimed| claimed < claimed_before);
            if stale {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
                job.error = Some(error.to_string());
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_creates_pending_job() {
        let store = InMemoryJobStore::new();
        let id = store.insert("rankings", json!({"project_id": "p1"})).await.unwrap();

        let job = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.payload, json!({"project_id": "p1"}));
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_claim_only_matches_job_type() {
        let store = InMemoryJobStore::new();
        store.insert("publish", json!({})).await.unwrap();

        assert!(store.claim_oldest_pending("rankings").await.unwrap().is_none());
        assert!(store.claim_oldest_pending("publish").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_takes_oldest_first() {
        let store = InMemoryJobStore::new();
        let mut newer = Job::new_pending("rankings", json!({"n": 2}));
        let mut older = Job::new_pending("rankings", json!({"n": 1}));
        older.created_at = newer.created_at - Duration::minutes(5);
        newer.created_at = older.created_at + Duration::minutes(1);
        store.insert_job(newer.clone()).await;
        store.insert_job(older.clone()).await;

        let first = store.claim_oldest_pending("rankings").await.unwrap().unwrap();
        let second = store.claim_oldest_pending("rankings").await.unwrap().unwrap();
        assert_eq!(first.id, older.id);
        assert_eq!(second.id, newer.id);
        assert!(store.claim_oldest_pending("rankings").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claimed_job_is_not_reclaimed() {
        let store = InMemoryJobStore::new();
        store.insert("publish", json!({})).await.unwrap();

        let claimed = store.claim_oldest_pending("publish").await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(claimed.claimed_at.is_some());
        assert!(store.claim_oldest_pending("publish").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_terminal_is_idempotent() {
        let store = InMemoryJobStore::new();
        let id = store.insert("rankings", json!({})).await.unwrap();
        store.claim_oldest_pending("rankings").await.unwrap();

        assert!(store
            .mark_terminal(id, JobStatus::Completed, None)
            .await
            .unwrap());
        let first = store.find_by_id(id).await.unwrap().unwrap();

        assert!(!store
            .mark_terminal(id, JobStatus::Completed, None)
            .await
            .unwrap());
        let second = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let store = InMemoryJobStore::new();
        let id = store.insert("rankings", json!({})).await.unwrap();
        store.claim_oldest_pending("rankings").await.unwrap();

        store
            .mark_terminal(id, JobStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap();
        let job = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_job_cannot_change_outcome() {
        let store = InMemoryJobStore::new();
        let id = store.insert("rankings", json!({})).await.unwrap();
        store.claim_oldest_pending("rankings").await.unwrap();
        store.mark_terminal(id, JobStatus::Completed, None).await.unwrap();

        let result = store
            .mark_terminal(id, JobStatus::Failed, Some("late".to_string()))
            .await;
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
        let job = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_pending_job_cannot_be_terminated() {
        let store = InMemoryJobStore::new();
        let id = store.insert("rankings", json!({})).await.unwrap();

        let result = store.mark_terminal(id, JobStatus::Completed, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mark_terminal_rejects_non_terminal_status() {
        let store = InMemoryJobStore::new();
        let id = store.insert("rankings", json!({})).await.unwrap();
        store.claim_oldest_pending("rankings").await.unwrap();

        let result = store.mark_terminal(id, JobStatus::Pending, None).await;
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
    }

    #[tokio::test]
    async fn test_mark_terminal_unknown_job() {
        let store = InMemoryJobStore::new();
        let result = store
            .mark_terminal(Uuid::new_v4(), JobStatus::Completed, None)
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_insert_unless_pending_skips_duplicates() {
        let store = InMemoryJobStore::new();
        let payload = json!({"project_id": "p1"});

        let first = store
            .insert_unless_pending("rankings", payload.clone())
            .await
            .unwrap();
        let second = store
            .insert_unless_pending("rankings", payload.clone())
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        // Once claimed, the project is eligible again
        store.claim_oldest_pending("rankings").await.unwrap();
        let third = store
            .insert_unless_pending("rankings", payload)
            .await
            .unwrap();
        assert!(third.is_some());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let store = InMemoryJobStore::new();
        store.insert("rankings", json!({"n": 1})).await.unwrap();
        store.insert("rankings", json!({"n": 2})).await.unwrap();
        store.insert("publish", json!({})).await.unwrap();
        store.claim_oldest_pending("rankings").await.unwrap();

        assert_eq!(
            store
                .count_by_status("rankings", JobStatus::Pending)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count_by_status("rankings", JobStatus::Processing)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_fail_stale_processing_only_touches_old_claims() {
        let store = InMemoryJobStore::new();
        let mut stale = Job::new_pending("publish", json!({"n": 1}));
        stale.status = JobStatus::Processing;
        stale.claimed_at = Some(Utc::now() - Duration::hours(2));
        let mut fresh = Job::new_pending("publish", json!({"n": 2}));
        fresh.status = JobStatus::Processing;
        fresh.claimed_at = Some(Utc::now());
        let pending = Job::new_pending("publish", json!({"n": 3}));
        store.insert_job(stale.clone()).await;
        store.insert_job(fresh.clone()).await;
        store.insert_job(pending.clone()).await;

        let reaped = store
            .fail_stale_processing(Utc::now() - Duration::hours(1), "stale")
            .await
            .unwrap();
        assert_eq!(reaped, 1);

        let stale = store.find_by_id(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, JobStatus::Failed);
        assert_eq!(stale.error.as_deref(), Some("stale"));
        let fresh = store.find_by_id(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, JobStatus::Processing);
        let pending = store.find_by_id(pending.id).await.unwrap().unwrap();
        assert_eq!(pending.status, JobStatus::Pending);
    }
}
