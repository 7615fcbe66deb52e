// HTTP job executor: POSTs a job's payload to `<base_url>/<job_type>`

use crate::config::{is_valid_job_type, DispatcherConfig};
use crate::errors::ExecutionError;
use crate::executor::{HandlerResponse, JobExecutor};
use crate::models::Job;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Upper bound on the response body kept in a failed job's error text
const MAX_ERROR_BODY_CHARS: usize = 2000;

/// HttpExecutor invokes job handlers over HTTP with a bearer service credential
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
    service_token: String,
    timeout_seconds: u64,
}

impl HttpExecutor {
    /// Create a new HttpExecutor with the specified timeout
    pub fn new(
        base_url: impl Into<String>,
        service_token: impl Into<String>,
        timeout_seconds: u64,
    ) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| {
                ExecutionError::HttpRequestFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_token: service_token.into(),
            timeout_seconds,
        })
    }

    pub fn from_config(config: &DispatcherConfig) -> Result<Self, ExecutionError> {
        Self::new(
            config.base_url.clone(),
            config.service_token.clone(),
            config.timeout_seconds,
        )
    }

    /// Handler endpoint for a job type
    pub fn endpoint(&self, job_type: &str) -> Result<String, ExecutionError> {
        if !is_valid_job_type(job_type) {
            return Err(ExecutionError::InvalidJobType(job_type.to_string()));
        }
        Ok(format!("{}/{}", self.base_url, job_type))
    }

    fn map_send_error(&self, err: reqwest::Error) -> ExecutionError {
        if err.is_timeout() {
            ExecutionError::Timeout(self.timeout_seconds)
        } else {
            ExecutionError::HttpRequestFailed(format!("HTTP request failed: {}", err))
        }
    }
}

fn truncate_body(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body;
    }
    let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[async_trait]
impl JobExecutor for HttpExecutor {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    async fn execute(&self, job: &Job) -> Result<HandlerResponse, ExecutionError> {
        let url = self.endpoint(&job.job_type)?;
        tracing::info!("Invoking handler at: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_token)
            .json(&job.payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        tracing::info!("Handler response status: {}", status);

        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            return Err(ExecutionError::HandlerRejected {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        Ok(HandlerResponse {
            status: status.as_u16(),
            body,
        })
    }
}
