use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration. Each section enables one role of the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub producer: Option<ProducerConfig>,
    #[serde(default)]
    pub collector: Option<CollectorConfig>,
}

impl Config {
    pub fn has_producer(&self) -> bool {
        self.producer.is_some()
    }

    pub fn has_collector(&self) -> bool {
        self.collector.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Directory scanned at startup and watched for new files
    pub watch_dir: PathBuf,

    /// Glob matched against file names inside `watch_dir`
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,

    /// Base URL of the collector, e.g. http://localhost:5275
    pub collector_url: String,

    /// Number of lines per SendBatch call
    pub batch_size: usize,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub malformed: MalformedConfig,
}

fn default_file_pattern() -> String {
    "*.json".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub delay: Duration,

    /// Delay multiplier applied after each failed pass; 1 keeps the delay fixed
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Unbounded when absent
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_multiplier() -> u32 {
    1
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay: default_retry_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MalformedConfig {
    #[serde(default)]
    pub policy: MalformedLinePolicy,

    /// Required by the quarantine policy
    #[serde(default)]
    pub quarantine_dir: Option<PathBuf>,
}

/// What the producer does with a line that is not JSON or lacks a `type` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Roll back and retry the pass, bad line included
    #[default]
    Retry,
    /// Move the bad line aside and keep going
    Quarantine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub listen: String,

    /// Storage root; its subdirectories are the known types
    pub root: PathBuf,
}
