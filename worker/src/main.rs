// Worker binary entry point: polling loops, cron producers and the reaper in one process

use anyhow::Result;
use common::bootstrap;
use common::config::Settings;
use common::scheduler::Scheduler;
use common::telemetry;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    bootstrap::init_telemetry(&settings)?;

    info!(
        job_types = settings.worker.job_types.len(),
        producers = settings.producers.len(),
        "Starting job dispatcher worker"
    );

    let db_pool = bootstrap::init_database_pool(&settings).await?;
    let (store, projects) = bootstrap::init_repositories(&db_pool);
    let executor = bootstrap::init_executor(&settings)?;
    let services = bootstrap::init_services(&settings, store, projects, executor)?;

    let handles: Vec<_> = services
        .iter()
        .cloned()
        .map(|service| {
            tokio::spawn(async move {
                if let Err(e) = service.start().await {
                    error!(error = %e, "Background service failed");
                }
            })
        })
        .collect();

    info!("Worker is running. Press Ctrl+C to shutdown gracefully");
    wait_for_shutdown(&services).await;

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Background service task panicked");
        }
    }

    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Worker shutdown complete");
    Ok(())
}

async fn wait_for_shutdown(services: &[Arc<dyn Scheduler>]) {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    for service in services {
        service.stop();
    }
}
