// Executor module for invoking external job handlers

pub mod http;

pub use http::HttpExecutor;

use crate::errors::ExecutionError;
use crate::models::Job;
use async_trait::async_trait;

/// Successful handler reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status: u16,
    pub body: String,
}

/// JobExecutor performs the single outbound call that does a job's work.
///
/// Any `Err` means the job failed; implementations must not retry.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<HandlerResponse, ExecutionError>;
}
