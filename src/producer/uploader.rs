use crate::config::types::{MalformedLinePolicy, ProducerConfig, RetryConfig};
use crate::transport::{LogRecord, TransportChannel, TransportError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("gave up on {} after {attempts} failed passes", path.display())]
    RetriesExhausted { path: PathBuf, attempts: u32 },

    #[error("upload of {} cancelled", path.display())]
    Cancelled { path: PathBuf },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> UploadError + '_ {
    move |source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Delay schedule between failed passes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Fixed delay, unbounded attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            multiplier: 1,
            max_delay: delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before the next pass, `failures` being the failed passes so far (>= 1).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(failures.saturating_sub(1));
        self.delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            delay: config.delay,
            multiplier: config.multiplier,
            max_delay: config.max_delay.max(config.delay),
            max_attempts: config.max_attempts,
        }
    }
}

/// What to do when a line cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedAction {
    /// Keep the line and retry the pass after the delay. A line that never
    /// parses keeps the file in retry until `max_attempts` runs out.
    Retry,
    /// Append the line to `{dir}/{file_name}.rejected`, drop it from the file
    /// and restart the pass at once.
    Quarantine { dir: PathBuf },
}

/// Why a pass stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassFailure {
    #[error("collector rejected the batch")]
    Rejected,

    #[error("malformed line: {reason}")]
    Malformed { line: String, reason: String },

    /// The send failed in transit; the batch counts as not acknowledged.
    #[error("collector unavailable: {reason}")]
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    /// `position` is the 1-based number of the last line read.
    Failed {
        position: usize,
        failure: PassFailure,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Records in batches the collector accepted
    pub records_sent: usize,
    pub batches_sent: usize,
    pub passes: usize,
    pub quarantined: usize,
}

#[derive(Deserialize)]
struct TypedLine {
    #[serde(rename = "type")]
    log_type: String,
}

/// Extract the `type` field of one JSON line.
pub fn parse_line(line: &str) -> Result<String, String> {
    serde_json::from_str::<TypedLine>(line)
        .map(|typed| typed.log_type)
        .map_err(|e| e.to_string())
}

/// Number of leading lines acknowledged by the collector when a pass fails at
/// `position`.
///
/// A failure exactly on a batch boundary means that boundary batch was never
/// accepted, so one more batch is taken back.
pub fn rollback_point(position: usize, batch_size: usize) -> usize {
    let batch_part = position % batch_size;
    let succeeded = position - batch_part;
    if batch_part == 0 {
        succeeded.saturating_sub(batch_size)
    } else {
        succeeded
    }
}

/// Ships one file in batches, rolling back to the last acknowledged batch on
/// failure and deleting the file once everything is accepted.
pub struct BatchUploader {
    transport: Arc<dyn TransportChannel>,
    batch_size: usize,
    retry: RetryPolicy,
    malformed: MalformedAction,
}

impl BatchUploader {
    pub fn new(transport: Arc<dyn TransportChannel>, batch_size: usize) -> Self {
        Self {
            transport,
            batch_size: batch_size.max(1),
            retry: RetryPolicy::default(),
            malformed: MalformedAction::Retry,
        }
    }

    pub fn from_config(transport: Arc<dyn TransportChannel>, config: &ProducerConfig) -> Self {
        let malformed = match (&config.malformed.policy, &config.malformed.quarantine_dir) {
            (MalformedLinePolicy::Quarantine, Some(dir)) => {
                MalformedAction::Quarantine { dir: dir.clone() }
            }
            _ => MalformedAction::Retry,
        };

        Self::new(transport, config.batch_size)
            .with_retry(RetryPolicy::from(&config.retry))
            .with_malformed(malformed)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_malformed(mut self, malformed: MalformedAction) -> Self {
        self.malformed = malformed;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Upload `path` until it is fully accepted and deleted.
    ///
    /// Transient transport errors and failed passes are retried per the
    /// policy; any other error is returned with the file left as it is.
    pub async fn upload(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, UploadError> {
        info!(path = %path.display(), "Processing file");

        let mut report = UploadReport::default();
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled {
                    path: path.to_path_buf(),
                });
            }

            report.passes += 1;
            match self.run_pass(path, &mut report).await {
                Ok(PassOutcome::Completed) => {
                    tokio::fs::remove_file(path).await.map_err(io_error(path))?;
                    info!(
                        path = %path.display(),
                        records = report.records_sent,
                        batches = report.batches_sent,
                        passes = report.passes,
                        "Processing of file is complete"
                    );
                    return Ok(report);
                }
                Ok(PassOutcome::Failed { position, failure }) => {
                    let keep_from = rollback_point(position, self.batch_size);

                    if let (
                        PassFailure::Malformed { line, reason },
                        MalformedAction::Quarantine { dir },
                    ) = (&failure, &self.malformed)
                    {
                        // Only a line already cut from the file is written aside
                        rewrite_from(path, keep_from, Some(position - 1)).await?;
                        quarantine_line(path, dir, line).await?;
                        report.quarantined += 1;
                        warn!(
                            path = %path.display(),
                            position = position,
                            reason = %reason,
                            "Malformed line quarantined"
                        );
                        continue;
                    }

                    if keep_from > 0 {
                        rewrite_from(path, keep_from, None).await?;
                    }
                    if let PassFailure::Unavailable { reason } = &failure {
                        warn!(
                            path = %path.display(),
                            acknowledged_lines = keep_from,
                            error = %reason,
                            "Collector connection error, reconnecting"
                        );
                    } else {
                        warn!(
                            path = %path.display(),
                            position = position,
                            acknowledged_lines = keep_from,
                            failure = %failure,
                            "File processing error, the file was not fully uploaded"
                        );
                    }
                }
                Err(e) => return Err(e),
            }

            failures += 1;
            if let Some(max_attempts) = self.retry.max_attempts {
                if failures >= max_attempts {
                    return Err(UploadError::RetriesExhausted {
                        path: path.to_path_buf(),
                        attempts: failures,
                    });
                }
            }

            let delay = self.retry.delay_for(failures);
            debug!(path = %path.display(), delay_ms = delay.as_millis() as u64, "Waiting before next pass");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(UploadError::Cancelled { path: path.to_path_buf() });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read the file once from the top, sending every full batch and the
    /// trailing partial one. Stops at the first malformed line, rejection or
    /// transient send failure; other transport errors are returned as `Err`.
    pub async fn run_pass(
        &self,
        path: &Path,
        report: &mut UploadReport,
    ) -> Result<PassOutcome, UploadError> {
        let file = tokio::fs::File::open(path).await.map_err(io_error(path))?;
        let mut lines = BufReader::new(file).lines();

        let mut position = 0usize;
        let mut batch: Vec<LogRecord> = Vec::with_capacity(self.batch_size);

        while let Some(line) = lines.next_line().await.map_err(io_error(path))? {
            position += 1;

            match parse_line(&line) {
                Ok(log_type) => batch.push(LogRecord {
                    log_type,
                    message: line,
                }),
                Err(reason) => {
                    return Ok(PassOutcome::Failed {
                        position,
                        failure: PassFailure::Malformed { line, reason },
                    });
                }
            }

            if position % self.batch_size == 0 {
                if let Some(failure) = self.send(&mut batch, report).await? {
                    return Ok(PassOutcome::Failed { position, failure });
                }
            }
        }

        if !batch.is_empty() {
            if let Some(failure) = self.send(&mut batch, report).await? {
                return Ok(PassOutcome::Failed { position, failure });
            }
        }

        Ok(PassOutcome::Completed)
    }

    /// Send and clear the batch. `Some` names why it was not acknowledged.
    async fn send(
        &self,
        batch: &mut Vec<LogRecord>,
        report: &mut UploadReport,
    ) -> Result<Option<PassFailure>, UploadError> {
        let records = std::mem::take(batch);
        match self.transport.send_batch(&records).await {
            Ok(true) => {
                report.records_sent += records.len();
                report.batches_sent += 1;
                Ok(None)
            }
            Ok(false) => Ok(Some(PassFailure::Rejected)),
            Err(e) if e.is_transient() => Ok(Some(PassFailure::Unavailable {
                reason: e.to_string(),
            })),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rewrite `path` keeping lines from index `keep_from` on, optionally without
/// the line at index `drop_line`. Indices are 0-based.
pub async fn rewrite_from(
    path: &Path,
    keep_from: usize,
    drop_line: Option<usize>,
) -> Result<(), UploadError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(io_error(path))?;

    let mut remaining = String::with_capacity(content.len());
    for (index, line) in content.lines().enumerate().skip(keep_from) {
        if Some(index) == drop_line {
            continue;
        }
        remaining.push_str(line);
        remaining.push('\n');
    }

    tokio::fs::write(path, remaining)
        .await
        .map_err(io_error(path))
}

async fn quarantine_line(path: &Path, dir: &Path, line: &str) -> Result<(), UploadError> {
    tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let target = dir.join(format!("{}.rejected", file_name));

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&target)
        .await
        .map_err(io_error(&target))?;
    file.write_all(format!("{}\n", line).as_bytes())
        .await
        .map_err(io_error(&target))?;
    file.flush().await.map_err(io_error(&target))
}
