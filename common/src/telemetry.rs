// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "job-dispatcher";

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - Trace context (current span and span list) in all log entries
/// - Log levels from `RUST_LOG` or the configured level
/// - Optional OpenTelemetry integration
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Flush remaining spans on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize Prometheus metrics exporter and describe the dispatcher metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("jobs_claimed_total", "Jobs moved from pending to processing");
    describe_counter!("jobs_completed_total", "Jobs whose handler succeeded");
    describe_counter!("jobs_failed_total", "Jobs whose handler call failed");
    describe_counter!("claim_errors_total", "Poll ticks skipped because of store errors");
    describe_counter!(
        "producer_jobs_inserted_total",
        "Jobs enqueued by cron producers"
    );
    describe_counter!(
        "producer_insert_failures_total",
        "Producer inserts that failed"
    );
    describe_counter!("jobs_reaped_total", "Stale processing jobs marked failed");
    describe_histogram!(
        "job_dispatch_duration_seconds",
        "Duration of handler calls in seconds"
    );
    describe_gauge!("job_queue_depth", "Pending jobs per job type");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_job_claimed(job_type: &str) {
    counter!("jobs_claimed_total", "job_type" => job_type.to_string()).increment(1);
}

#[inline]
pub fn record_claim_error(job_type: &str) {
    counter!("claim_errors_total", "job_type" => job_type.to_string()).increment(1);
}

#[inline]
pub fn record_job_completed(job_type: &str) {
    counter!("jobs_completed_total", "job_type" => job_type.to_string()).increment(1);
}

#[inline]
pub fn record_job_failed(job_type: &str, reason: &str) {
    counter!(
        "jobs_failed_total",
        "job_type" => job_type.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_dispatch_duration(job_type: &str, duration_seconds: f64) {
    histogram!("job_dispatch_duration_seconds", "job_type" => job_type.to_string())
        .record(duration_seconds);
}

#[inline]
pub fn record_producer_inserted(producer: &str, count: usize) {
    counter!("producer_jobs_inserted_total", "producer" => producer.to_string())
        .increment(count as u64);
}

#[inline]
pub fn record_producer_failures(producer: &str, count: usize) {
    counter!("producer_insert_failures_total", "producer" => producer.to_string())
        .increment(count as u64);
}

#[inline]
pub fn record_jobs_reaped(count: u64) {
    counter!("jobs_reaped_total").increment(count);
}

#[inline]
pub fn update_queue_depth(job_type: &str, depth: i64) {
    gauge!("job_queue_depth", "job_type" => job_type.to_string()).set(depth as f64);
}
