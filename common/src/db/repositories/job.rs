// Job repository implementation: the PostgreSQL job store

use crate::db::DbPool;
use crate::errors::{DatabaseError, ValidationError};
use crate::models::{Job, JobStatus};
use crate::store::{ensure_terminal, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

const JOB_COLUMNS: &str =
    "id, job_type, payload, status, created_at, claimed_at, completed_at, error";

/// Repository for job-related database operations
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    /// Create a new JobRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    #[instrument(skip(self, payload))]
    async fn insert(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload, status, created_at)
            VALUES ($1, $2, $3, 'pending', NOW())
            "#,
        )
        .bind(id)
        .bind(job_type)
        .bind(&payload)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(job_id = %id, job_type = job_type, "Job enqueued");
        Ok(id)
    }

    /// Racing producers may still both insert; the check only covers
    /// overlapping runs, not simultaneous ones.
    #[instrument(skip(self, payload))]
    async fn insert_unless_pending(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Option<Uuid>, DatabaseError> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload, status, created_at)
            SELECT $1, $2, $3, 'pending', NOW()
            WHERE NOT EXISTS (
                SELECT 1 FROM jobs
                WHERE job_type = $2
                  AND status = 'pending'
                  AND payload = $3
            )
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_type)
        .bind(&payload)
        .fetch_optional(self.pool.pool())
        .await?;

        match row {
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                tracing::info!(job_id = %id, job_type = job_type, "Job enqueued");
                Ok(Some(id))
            }
            None => {
                tracing::debug!(job_type = job_type, "Identical job already pending, skipped");
                Ok(None)
            }
        }
    }

    /// Claim the oldest pending job of a type.
    ///
    /// The inner select locks the candidate row and skips rows other
    /// transactions hold; the outer `status = 'pending'` predicate is the
    /// compare-and-swap that guarantees a single winner.
    #[instrument(skip(self))]
    async fn claim_oldest_pending(&self, job_type: &str) -> Result<Option<Job>, DatabaseError> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'processing', claimed_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE job_type = $1 AND status = 'pending'
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job_type)
            .fetch_optional(self.pool.pool())
            .await?;

        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, job_type = job_type, "Job claimed");
        }
        Ok(job)
    }

    #[instrument(skip(self, error))]
    async fn mark_terminal(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<bool, DatabaseError> {
        ensure_terminal(status)?;
        let error = match status {
            JobStatus::Failed => error,
            _ => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                completed_at = NOW(),
                error = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(&error)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 1 {
            tracing::debug!(job_id = %job_id, status = %status, "Job marked terminal");
            return Ok(true);
        }

        // Nothing changed: either a repeat of the same outcome or a bad transition
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(self.pool.pool())
            .await?;

        match current {
            None => Err(DatabaseError::NotFound(format!("Job not found: {}", job_id))),
            Some(current) if current == status.as_str() => Ok(false),
            Some(current) => Err(ValidationError::InvalidTransition {
                from: current,
                to: status.to_string(),
            }
            .into()),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let query = format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS);
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .fetch_optional(self.pool.pool())
            .await?;

        Ok(job)
    }

    #[instrument(skip(self))]
    async fn count_by_status(
        &self,
        job_type: &str,
        status: JobStatus,
    ) -> Result<i64, DatabaseError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE job_type = $1 AND status = $2")
                .bind(job_type)
                .bind(status.as_str())
                .fetch_one(self.pool.pool())
                .await?;

        Ok(count)
    }

    #[instrument(skip(self))]
    async fn fail_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                completed_at = NOW(),
                error = $2
            WHERE status = 'processing' AND claimed_at < $1
            "#,
        )
        .bind(claimed_before)
        .bind(error)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
