// Bootstrap utilities for binary initialization

use crate::config::Settings;
use crate::db::{DbPool, JobRepository, ProjectRepository};
use crate::executor::{HttpExecutor, JobExecutor};
use crate::scheduler::{
    JobTypeSchedule, ProducerEngine, ProjectSource, Reaper, ReaperSettings, Scheduler,
    SchedulerEngine,
};
use crate::store::JobStore;
use crate::telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Initialize logging, tracing and the metrics exporter from settings
///
/// # Errors
/// Returns error if a subscriber is already installed or the exporter cannot bind
pub fn init_telemetry(settings: &Settings) -> Result<()> {
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )
    .context("Failed to initialize logging")?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port).context("Failed to initialize metrics")?;
    }

    Ok(())
}

/// Initialize database pool, verify connectivity and apply migrations when enabled
///
/// # Errors
/// Returns error if the pool cannot connect, the health check fails, or a
/// migration fails
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    db_pool
        .health_check()
        .await
        .context("Database health check failed")?;

    if settings.database.run_migrations {
        db_pool
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Postgres-backed job store and project source sharing one pool
pub fn init_repositories(db_pool: &DbPool) -> (Arc<dyn JobStore>, Arc<dyn ProjectSource>) {
    let store = Arc::new(JobRepository::new(db_pool.clone())) as Arc<dyn JobStore>;
    let projects = Arc::new(ProjectRepository::new(db_pool.clone())) as Arc<dyn ProjectSource>;
    (store, projects)
}

/// Initialize the HTTP executor that calls job handlers
///
/// # Errors
/// Returns error if the HTTP client cannot be built
pub fn init_executor(settings: &Settings) -> Result<Arc<dyn JobExecutor>> {
    let executor = HttpExecutor::from_config(&settings.dispatcher)
        .context("Failed to initialize HTTP executor")?;

    info!(
        base_url = %settings.dispatcher.base_url,
        timeout_seconds = settings.dispatcher.timeout_seconds,
        "HTTP executor initialized"
    );
    Ok(Arc::new(executor))
}

/// Build every background service the worker runs: one polling engine, the
/// cron producers and the reaper.
///
/// # Errors
/// Returns error if a producer's cron expression or timezone is invalid
pub fn init_services(
    settings: &Settings,
    store: Arc<dyn JobStore>,
    projects: Arc<dyn ProjectSource>,
    executor: Arc<dyn JobExecutor>,
) -> Result<Vec<Arc<dyn Scheduler>>> {
    let schedules: Vec<JobTypeSchedule> = settings
        .worker
        .job_types
        .iter()
        .map(JobTypeSchedule::from)
        .collect();
    let job_types: Vec<String> = schedules.iter().map(|s| s.job_type.clone()).collect();

    let engine = SchedulerEngine::new(
        schedules,
        store.clone(),
        executor,
        Duration::from_secs(settings.worker.shutdown_grace_seconds),
    );

    let producers = ProducerEngine::from_config(&settings.producers, store.clone(), projects)
        .context("Failed to build job producers")?;

    let reaper = Reaper::new(ReaperSettings::from(&settings.reaper), job_types, store);

    info!(
        job_types = engine.schedules().len(),
        producers = producers.producers().len(),
        "Background services built"
    );

    Ok(vec![
        Arc::new(engine) as Arc<dyn Scheduler>,
        Arc::new(producers),
        Arc::new(reaper),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DatabaseError;
    use crate::models::ProjectTarget;
    use crate::store::InMemoryJobStore;
    use async_trait::async_trait;

    struct NoProjects;

    #[async_trait]
    impl ProjectSource for NoProjects {
        async fn eligible_projects(&self, _flag: &str) -> Result<Vec<ProjectTarget>, DatabaseError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_init_services_from_defaults() {
        let settings = Settings::default();
        let executor = init_executor(&settings).unwrap();
        let services = init_services(
            &settings,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(NoProjects),
            executor,
        )
        .unwrap();
        assert_eq!(services.len(), 3);
    }

    #[test]
    fn test_init_services_rejects_bad_producer_cron() {
        let mut settings = Settings::default();
        settings.producers[0].cron = "bogus".to_string();
        let executor = init_executor(&settings).unwrap();
        let result = init_services(
            &settings,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(NoProjects),
            executor,
        );
        assert!(result.is_err());
    }
}
