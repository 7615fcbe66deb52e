// Project repository: read-only view of the projects producers enqueue work for

use crate::config::is_valid_identifier;
use crate::db::DbPool;
use crate::errors::{DatabaseError, ValidationError};
use crate::models::ProjectTarget;
use crate::scheduler::producer::ProjectSource;
use async_trait::async_trait;
use tracing::instrument;

/// Repository over the application's `projects` table
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    pool: DbPool,
}

impl ProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectSource for ProjectRepository {
    /// `flag` is interpolated as a column name, so it must be a plain identifier
    #[instrument(skip(self))]
    async fn eligible_projects(&self, flag: &str) -> Result<Vec<ProjectTarget>, DatabaseError> {
        if !is_valid_identifier(flag) {
            return Err(ValidationError::InvalidFieldValue {
                field: "project_flag".to_string(),
                reason: format!("'{}' is not a valid column name", flag),
            }
            .into());
        }

        let query = format!(
            "SELECT id::text AS id FROM projects WHERE \"{}\" = true ORDER BY id",
            flag
        );
        let projects = sqlx::query_as::<_, ProjectTarget>(&query)
            .fetch_all(self.pool.pool())
            .await?;

        tracing::debug!(count = projects.len(), flag = flag, "Loaded eligible projects");
        Ok(projects)
    }
}
