// Configuration management with layered configuration (file, env)

use crate::schedule::{parse_cron_expression, parse_timezone};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub producers: Vec<ProducerConfig>,
    #[serde(default)]
    pub reaper: ReaperConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub run_migrations: bool,
}

/// Where and how job handlers are invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Base URL; each job is POSTed to `<base_url>/<job_type>`
    pub base_url: String,
    /// Bearer credential sent with every handler call
    pub service_token: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub job_types: Vec<JobTypeConfig>,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

/// Polling cadence for one job type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobTypeConfig {
    pub name: String,
    pub interval_seconds: u64,
}

/// A cron-driven producer that enqueues one job per eligible project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub name: String,
    pub job_type: String,
    /// Second-precision cron expression (`sec min hour day month weekday`)
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Boolean column on `projects` that marks a project as eligible
    pub project_flag: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Skip projects that already have an identical pending job
    #[serde(default = "default_true")]
    pub dedupe: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Processing jobs older than this are failed; 0 disables the reaper
    pub stale_after_seconds: u64,
    pub interval_seconds: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            stale_after_seconds: 3600,
            interval_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.dispatcher.base_url.is_empty() {
            return Err("Dispatcher base_url cannot be empty".to_string());
        }
        if !self.dispatcher.base_url.starts_with("http://")
            && !self.dispatcher.base_url.starts_with("https://")
        {
            return Err("Dispatcher base_url must be an http(s) URL".to_string());
        }
        if self.dispatcher.service_token.is_empty() {
            return Err("Dispatcher service_token cannot be empty".to_string());
        }
        if self.dispatcher.timeout_seconds == 0 {
            return Err("Dispatcher timeout_seconds must be greater than 0".to_string());
        }

        if self.worker.job_types.is_empty() {
            return Err("At least one worker job type must be configured".to_string());
        }
        let mut job_types = HashSet::new();
        for job_type in &self.worker.job_types {
            if !is_valid_job_type(&job_type.name) {
                return Err(format!("Invalid job type name '{}'", job_type.name));
            }
            if job_type.interval_seconds == 0 {
                return Err(format!(
                    "Job type '{}' interval_seconds must be greater than 0",
                    job_type.name
                ));
            }
            if !job_types.insert(job_type.name.as_str()) {
                return Err(format!("Job type '{}' is configured twice", job_type.name));
            }
        }

        for producer in &self.producers {
            if !job_types.contains(producer.job_type.as_str()) {
                return Err(format!(
                    "Producer '{}' targets job type '{}' which has no polling loop",
                    producer.name, producer.job_type
                ));
            }
            parse_cron_expression(&producer.cron)
                .map_err(|e| format!("Producer '{}': {}", producer.name, e))?;
            parse_timezone(&producer.timezone)
                .map_err(|e| format!("Producer '{}': {}", producer.name, e))?;
            if !is_valid_identifier(&producer.project_flag) {
                return Err(format!(
                    "Producer '{}' project_flag '{}' is not a valid column name",
                    producer.name, producer.project_flag
                ));
            }
        }

        if self.reaper.stale_after_seconds > 0 {
            if self.reaper.interval_seconds == 0 {
                return Err("Reaper interval_seconds must be greater than 0".to_string());
            }
            // A claim younger than this may still have a handler call in flight
            let longest_dispatch =
                self.dispatcher.timeout_seconds + self.worker.shutdown_grace_seconds;
            if self.reaper.stale_after_seconds <= longest_dispatch {
                return Err(format!(
                    "Reaper stale_after_seconds ({}) must exceed dispatcher timeout_seconds plus worker shutdown_grace_seconds ({})",
                    self.reaper.stale_after_seconds, longest_dispatch
                ));
            }
        }

        Ok(())
    }
}

/// Job types become URL path segments
pub fn is_valid_job_type(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Plain SQL identifier: letter or underscore, then letters, digits, underscores
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/content_jobs".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
                run_migrations: false,
            },
            dispatcher: DispatcherConfig {
                base_url: "http://localhost:3000/api/jobs".to_string(),
                service_token: "change-me-in-production".to_string(),
                timeout_seconds: 300,
            },
            worker: WorkerConfig {
                job_types: vec![
                    JobTypeConfig {
                        name: "rankings".to_string(),
                        interval_seconds: 5,
                    },
                    JobTypeConfig {
                        name: "generate".to_string(),
                        interval_seconds: 10,
                    },
                    JobTypeConfig {
                        name: "publish".to_string(),
                        interval_seconds: 3,
                    },
                ],
                shutdown_grace_seconds: default_shutdown_grace_seconds(),
            },
            producers: vec![
                ProducerConfig {
                    name: "hourly-rankings".to_string(),
                    job_type: "rankings".to_string(),
                    cron: "0 0 * * * *".to_string(),
                    timezone: default_timezone(),
                    project_flag: "rank_tracking_enabled".to_string(),
                    enabled: true,
                    dedupe: true,
                },
                ProducerConfig {
                    name: "autopilot-generate".to_string(),
                    job_type: "generate".to_string(),
                    cron: "0 0 */6 * * *".to_string(),
                    timezone: default_timezone(),
                    project_flag: "autopilot_enabled".to_string(),
                    enabled: true,
                    dedupe: true,
                },
            ],
            reaper: ReaperConfig::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_missing_token() {
        let mut settings = Settings::default();
        settings.dispatcher.service_token = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_interval() {
        let mut settings = Settings::default();
        settings.worker.job_types[0].interval_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_duplicate_job_type() {
        let mut settings = Settings::default();
        let duplicate = settings.worker.job_types[0].clone();
        settings.worker.job_types.push(duplicate);
        let err = settings.validate().unwrap_err();
        assert!(err.contains("configured twice"));
    }

    #[test]
    fn test_validation_catches_producer_without_loop() {
        let mut settings = Settings::default();
        settings.producers[0].job_type = "audit".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.contains("no polling loop"));
    }

    #[test]
    fn test_validation_catches_bad_cron() {
        let mut settings = Settings::default();
        settings.producers[0].cron = "every hour".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_unsafe_project_flag() {
        let mut settings = Settings::default();
        settings.producers[0].project_flag = "enabled; DROP TABLE jobs".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_reaper_threshold_must_outlast_dispatch_timeout() {
        let mut settings = Settings::default();
        settings.reaper.stale_after_seconds = 1;
        let err = settings.validate().unwrap_err();
        assert!(err.contains("stale_after_seconds"));

        // Equal to timeout plus grace still overlaps an in-flight call
        settings.reaper.stale_after_seconds =
            settings.dispatcher.timeout_seconds + settings.worker.shutdown_grace_seconds;
        assert!(settings.validate().is_err());

        settings.reaper.stale_after_seconds += 1;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_disabled_reaper_skips_threshold_check() {
        let mut settings = Settings::default();
        settings.reaper.stale_after_seconds = 0;
        settings.reaper.interval_seconds = 0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("autopilot_enabled"));
        assert!(is_valid_identifier("_flag1"));
        assert!(!is_valid_identifier("1flag"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("flag-name"));
    }

    #[test]
    fn test_job_type_rules() {
        assert!(is_valid_job_type("rankings"));
        assert!(is_valid_job_type("publish-wordpress"));
        assert!(!is_valid_job_type("../admin"));
        assert!(!is_valid_job_type(""));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[database]
url = "postgresql://localhost/test"
max_connections = 4
min_connections = 1
connect_timeout_seconds = 5

[dispatcher]
base_url = "https://app.example.com/api/jobs"
service_token = "secret"
timeout_seconds = 60

[worker]
job_types = [
  { name = "rankings", interval_seconds = 5 },
  { name = "publish", interval_seconds = 3 },
]

[[producers]]
name = "hourly-rankings"
job_type = "rankings"
cron = "0 0 * * * *"
project_flag = "rank_tracking_enabled"

[observability]
log_level = "debug"
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.worker.job_types.len(), 2);
        assert_eq!(settings.worker.shutdown_grace_seconds, 30);
        assert_eq!(settings.producers[0].timezone, "UTC");
        assert!(settings.producers[0].dedupe);
        assert_eq!(settings.reaper.stale_after_seconds, 3600);
        assert!(settings.validate().is_ok());
    }
}
