use crate::collector::{CollectorError, CollectorRunner};
use crate::config::parse::{load_config, ConfigError};
use crate::config::types::Config;
use crate::config::{searched_locations, CONFIG_ENV};
use crate::producer::{ProducerError, ProducerRunner};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "config not found; searched {}. Use --config <path>, set {} or run \
         'logferry config init' to generate one",
        searched_locations(),
        CONFIG_ENV
    )]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("producer error: {0}")]
    Producer(#[from] ProducerError),

    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),
}

pub fn load(config_path: Option<&Path>) -> Result<Config, RunError> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;
    info!(config_path = %config_path.display(), "Loading configuration");
    Ok(load_config(config_path)?)
}

/// Token cancelled on the first Ctrl+C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                trigger.cancel();
            }
            Err(e) => error!(error = %e, "Unable to listen for shutdown signal"),
        }
    });

    shutdown
}

pub async fn run_producer(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config = load(config_path.as_deref())?;
    let runner = ProducerRunner::new(&config)?;

    info!("Producer started, press Ctrl+C to shutdown");
    runner.run(shutdown_on_ctrl_c()).await?;
    Ok(())
}

pub async fn run_collector(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config = load(config_path.as_deref())?;
    let runner = CollectorRunner::new(&config)?;

    info!("Collector started, press Ctrl+C to shutdown");
    runner.run(shutdown_on_ctrl_c()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_config_path() {
        let err = load(None).unwrap_err();
        assert!(matches!(err, RunError::ConfigNotFound));
        let message = err.to_string();
        assert!(message.contains("/etc/logferry/config.yml"));
        assert!(message.contains("LOGFERRY_CONFIG"));
    }

    #[test]
    fn test_load_reports_invalid_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "producer:\n  watch_dir: /tmp\n  collector_url: http://x\n  batch_size: 0").unwrap();

        assert!(matches!(
            load(Some(file.path())),
            Err(RunError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_producer_requires_section() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "collector:\n  listen: \"127.0.0.1:0\"\n  root: /tmp/store").unwrap();

        let result = run_producer(Some(file.path().to_path_buf())).await;
        assert!(matches!(result, Err(RunError::Producer(ProducerError::Config(_)))));
    }
}
