use crate::collector::api::CollectorState;
use crate::collector::server::start_server;
use crate::collector::service::CollectorService;
use crate::collector::storage::StorageError;
use crate::config::types::{CollectorConfig, Config};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

pub struct CollectorRunner {
    collector_config: CollectorConfig,
}

impl CollectorRunner {
    pub fn new(config: &Config) -> Result<Self, CollectorError> {
        let collector_config = config
            .collector
            .as_ref()
            .ok_or_else(|| {
                CollectorError::Config("collector config section missing".to_string())
            })?
            .clone();

        Ok(Self { collector_config })
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), CollectorError> {
        info!("Starting collector mode");

        let listen_addr: SocketAddr = self
            .collector_config
            .listen
            .parse()
            .map_err(|e| CollectorError::Config(format!("Invalid listen address: {}", e)))?;

        let service = CollectorService::new(&self.collector_config.root);
        service.init().await?;

        let state = Arc::new(CollectorState::new(service));
        start_server(listen_addr, state, shutdown).await?;

        info!("Collector stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_requires_collector_section() {
        let config = parse_config(
            "producer:\n  watch_dir: /tmp/in\n  collector_url: http://localhost:1\n  batch_size: 1\n",
        )
        .unwrap();
        assert!(matches!(
            CollectorRunner::new(&config),
            Err(CollectorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::TempDir::new().unwrap();
        let yaml = format!(
            "collector:\n  listen: \"127.0.0.1:0\"\n  root: {}\n",
            dir.path().join("store").display()
        );
        let runner = CollectorRunner::new(&parse_config(&yaml).unwrap()).unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        runner.run(shutdown).await.unwrap();

        assert!(dir.path().join("store").is_dir());
    }
}
