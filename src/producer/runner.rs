use crate::config::types::{Config, ProducerConfig};
use crate::producer::supervisor::{IngestSupervisor, SupervisorError};
use crate::producer::uploader::BatchUploader;
use crate::transport::{HttpTransport, TransportChannel, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct ProducerRunner {
    producer_config: ProducerConfig,
}

impl ProducerRunner {
    pub fn new(config: &Config) -> Result<Self, ProducerError> {
        let producer_config = config
            .producer
            .as_ref()
            .ok_or_else(|| ProducerError::Config("producer config section missing".to_string()))?
            .clone();

        Ok(Self { producer_config })
    }

    /// Run against the collector named in the config until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ProducerError> {
        let transport = HttpTransport::new(
            &self.producer_config.collector_url,
            self.producer_config.request_timeout,
        )?;
        self.run_with_transport(Arc::new(transport), shutdown).await
    }

    /// Watch first, then drain what is already there, then wait for shutdown.
    pub async fn run_with_transport(
        self,
        transport: Arc<dyn TransportChannel>,
        shutdown: CancellationToken,
    ) -> Result<(), ProducerError> {
        let config = &self.producer_config;
        info!(
            watch_dir = %config.watch_dir.display(),
            collector = %config.collector_url,
            batch_size = config.batch_size,
            "Starting producer mode"
        );

        let uploader = BatchUploader::from_config(transport, config);
        let supervisor = Arc::new(IngestSupervisor::new(
            &config.watch_dir,
            &config.file_pattern,
            uploader,
            shutdown.clone(),
        )?);

        let watch_handle = supervisor.watch().await?;

        let uploaded = supervisor.process_existing().await?;
        info!(files = uploaded, "Existing files processed");

        shutdown.cancelled().await;
        if let Err(e) = watch_handle.await {
            warn!(error = %e, "Watcher task ended abnormally");
            return Err(e.into());
        }

        info!("Producer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_requires_producer_section() {
        let config = parse_config("collector:\n  listen: \"127.0.0.1:0\"\n  root: /tmp/x\n").unwrap();
        assert!(matches!(
            ProducerRunner::new(&config),
            Err(ProducerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_run_with_cancelled_token_returns() {
        let dir = tempfile::TempDir::new().unwrap();
        let yaml = format!(
            "producer:\n  watch_dir: {}\n  collector_url: http://127.0.0.1:9\n  batch_size: 5\n",
            dir.path().join("in").display()
        );
        let runner = ProducerRunner::new(&parse_config(&yaml).unwrap()).unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        runner.run(shutdown).await.unwrap();

        assert!(dir.path().join("in").is_dir());
    }
}
