use serde::Deserialize;
use std::time::Duration;

use crate::services::dispatcher::DispatcherConfig;
use crate::services::storage::R2Config;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Upper bound on pooled PostgreSQL connections
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// AES-256-GCM encryption key (base64-encoded, 32 bytes)
    pub encryption_key: String,

    /// Maximum number of analysis pipelines running at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Dispatcher tick interval in milliseconds
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Watchdog for a single analysis run in seconds (0 disables it)
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Base URL of a remote classification server. Unset uses the built-in classifier.
    #[serde(default)]
    pub classifier_url: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_dispatch_interval_ms() -> u64 {
    3000
}

fn default_job_timeout_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn r2(&self) -> R2Config {
        R2Config {
            bucket: self.r2_bucket.clone(),
            endpoint: self.r2_endpoint.clone(),
            access_key: self.r2_access_key.clone(),
            secret_key: self.r2_secret_key.clone(),
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent_jobs: self.max_concurrent_jobs.max(1),
            tick_interval: Duration::from_millis(self.dispatch_interval_ms.max(1)),
            job_timeout: (self.job_timeout_secs > 0)
                .then(|| Duration::from_secs(self.job_timeout_secs)),
        }
    }
}
