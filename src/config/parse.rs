use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string)
}

/// Parse, expand and validate a config held in memory.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let expanded = expand_env_vars(yaml);
    if !expanded.missing.is_empty() {
        return Err(ConfigError::Validation(format!(
            "environment variables are not set: {}",
            expanded.missing.join(", ")
        )));
    }

    let mut config: Config = serde_yaml::from_str(&expanded.text)?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    if let Some(producer) = config.producer.as_mut() {
        producer.watch_dir = expand_tilde(&producer.watch_dir);
        if let Some(dir) = producer.malformed.quarantine_dir.as_mut() {
            *dir = expand_tilde(dir);
        }
    }

    if let Some(collector) = config.collector.as_mut() {
        collector.root = expand_tilde(&collector.root);
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if !config.has_producer() && !config.has_collector() {
        errors.push(
            "config must enable at least one role: configure 'producer' or 'collector'"
                .to_string(),
        );
    }

    if let Some(producer) = &config.producer {
        validate_producer(producer, &mut errors);
    }

    if let Some(collector) = &config.collector {
        if collector.listen.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "collector.listen: '{}' is not a valid socket address",
                collector.listen
            ));
        }
        if collector.root.as_os_str().is_empty() {
            errors.push("collector.root cannot be empty".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_producer(producer: &ProducerConfig, errors: &mut Vec<String>) {
    if producer.batch_size == 0 {
        errors.push("producer.batch_size must be a positive integer".to_string());
    }

    if producer.collector_url.is_empty() {
        errors.push("producer.collector_url cannot be empty".to_string());
    }

    if let Err(e) = glob::Pattern::new(&producer.file_pattern) {
        errors.push(format!(
            "producer.file_pattern: invalid glob '{}': {}",
            producer.file_pattern, e
        ));
    }

    if producer.retry.multiplier == 0 {
        errors.push("producer.retry.multiplier must be at least 1".to_string());
    }

    if producer.retry.max_attempts == Some(0) {
        errors.push("producer.retry.max_attempts must be at least 1 when set".to_string());
    }

    if producer.malformed.policy == MalformedLinePolicy::Quarantine
        && producer.malformed.quarantine_dir.is_none()
    {
        errors.push(
            "producer.malformed.quarantine_dir is required by the quarantine policy".to_string(),
        );
    }
}
