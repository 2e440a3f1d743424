use crate::collector::storage::{is_valid_type_name, ticks_now};
use crate::config::parse::{load_config, ConfigError};
use crate::producer::RetryPolicy;
use crate::transport::{
    collect_records, HttpTransport, LogRecord, TransportChannel, TransportError, TypesReply,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);
const READ_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("no collector URL: pass --url or configure producer.collector_url")]
    NoCollectorUrl,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("collector reported an error: {0}")]
    Collector(String),

    #[error("invalid log type '{0}': must be a single path component")]
    InvalidType(String),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An explicit URL wins, otherwise the producer section of the config names
/// the collector.
pub fn resolve_url(url: Option<String>, config_path: Option<&Path>) -> Result<String, ReadError> {
    if let Some(url) = url {
        return Ok(url);
    }

    let config_path = config_path.ok_or(ReadError::NoCollectorUrl)?;
    let config = load_config(config_path)?;
    config
        .producer
        .map(|producer| producer.collector_url)
        .ok_or(ReadError::NoCollectorUrl)
}

pub fn read_retry() -> RetryPolicy {
    RetryPolicy::fixed(READ_RETRY_DELAY).with_max_attempts(READ_ATTEMPTS)
}

/// Repeat `call` while the collector is unreachable. The last transient error
/// is returned once the policy's attempts run out.
async fn retry_transient<T, F, Fut>(
    retry: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut failures = 0u32;
    loop {
        match call().await {
            Err(e) if e.is_transient() => {
                failures += 1;
                if matches!(retry.max_attempts, Some(max) if failures >= max) {
                    return Err(e);
                }
                let delay = retry.delay_for(failures);
                warn!(
                    operation = operation,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Collector connection error, reconnecting"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Known types, sorted, or the collector's error message.
pub async fn fetch_types(
    transport: &dyn TransportChannel,
    retry: &RetryPolicy,
) -> Result<Vec<String>, ReadError> {
    match retry_transient(retry, "list_types", || transport.list_types()).await? {
        TypesReply::Types(types) => Ok(types),
        TypesReply::Error(message) => Err(ReadError::Collector(message)),
    }
}

/// Every stored record of one type. An empty vector means no data, which is
/// not an error.
pub async fn fetch_records(
    transport: &dyn TransportChannel,
    log_type: &str,
    retry: &RetryPolicy,
) -> Result<Vec<LogRecord>, ReadError> {
    let stream =
        retry_transient(retry, "stream_by_type", || transport.stream_by_type(log_type)).await?;
    collect_records(stream).await.map_err(ReadError::Collector)
}

/// Write messages one per line to `{out_dir}/MessagesByType_{type}_{ticks}.json`.
pub fn write_records(
    out_dir: &Path,
    log_type: &str,
    records: &[LogRecord],
) -> Result<PathBuf, ReadError> {
    if !is_valid_type_name(log_type) {
        return Err(ReadError::InvalidType(log_type.to_string()));
    }

    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ReadError::Io { path, source }
    };

    std::fs::create_dir_all(out_dir).map_err(io_error(out_dir))?;

    let path = out_dir.join(format!("MessagesByType_{}_{}.json", log_type, ticks_now()));
    let mut content = String::new();
    for record in records {
        content.push_str(&record.message);
        content.push('\n');
    }
    std::fs::write(&path, content).map_err(io_error(&path))?;
    Ok(path)
}

pub async fn types(url: Option<String>, config_path: Option<PathBuf>) -> Result<(), ReadError> {
    let url = resolve_url(url, config_path.as_deref())?;
    let transport = HttpTransport::new(&url, READ_TIMEOUT)?;

    let types = fetch_types(&transport, &read_retry()).await?;
    if types.is_empty() {
        println!("No log types stored");
    }
    for log_type in types {
        println!("{}", log_type);
    }
    Ok(())
}

pub async fn fetch(
    log_type: &str,
    out_dir: &Path,
    url: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<(), ReadError> {
    if !is_valid_type_name(log_type) {
        return Err(ReadError::InvalidType(log_type.to_string()));
    }

    let url = resolve_url(url, config_path.as_deref())?;
    let transport = HttpTransport::new(&url, READ_TIMEOUT)?;

    info!(log_type = %log_type, collector = %url, "Fetching records");
    let records = fetch_records(&transport, log_type, &read_retry()).await?;
    if records.is_empty() {
        println!("No data for type '{}'", log_type);
        return Ok(());
    }

    let path = write_records(out_dir, log_type, &records)?;
    println!("Wrote {} messages to {}", records.len(), path.display());
    Ok(())
}
