use crate::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Job Models
// ============================================================================

/// Job is one unit of asynchronous work routed to an external handler by type
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    /// Create a new pending job stamped with the current time
    pub fn new_pending(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// JobStatus is the lifecycle state of a job
///
/// `pending -> processing -> completed | failed`. Terminal states never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transitions are allowed from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Check a single-step transition against the job state machine
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(ValidationError::InvalidFieldValue {
                field: "status".to_string(),
                reason: format!("unknown job status '{}'", s),
            }),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

// ============================================================================
// Producer Models
// ============================================================================

/// ProjectTarget is an eligible project a producer enqueues work for
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct ProjectTarget {
    pub id: String,
}

impl ProjectTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Payload handed to the handler for jobs produced for this project
    pub fn job_payload(&self) -> serde_json::Value {
        serde_json::json!({ "project_id": self.id })
    }
}

/// Outcome of a single producer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerRunSummary {
    /// Projects returned by the project source
    pub eligible: usize,
    /// Jobs actually inserted
    pub inserted: usize,
    /// Projects skipped because a matching job was already pending
    pub skipped: usize,
    /// Inserts that failed
    pub failed: usize,
}
