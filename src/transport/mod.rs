pub mod http;
pub mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;

pub use http::HttpTransport;
pub use types::{LogRecord, SendBatchRequest, SendBatchResponse, StreamFrame, TypesReply};

/// Lazy sequence of frames returned by `stream_by_type`.
pub type RecordStream = BoxStream<'static, StreamFrame>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("collector unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("collector returned error status {status}: {message}")]
    Collector { status: u16, message: String },

    #[error("invalid collector URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl TransportError {
    /// Whether the same call may simply be repeated later.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Unavailable(_) => true,
            TransportError::Collector { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

/// The three calls a producer or reader makes against a collector.
///
/// Ordinary rejection is a value (`Ok(false)`, `TypesReply::Error`, a terminal
/// `StreamFrame::Error`); `Err` is reserved for communication failures.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    async fn send_batch(&self, records: &[LogRecord]) -> Result<bool, TransportError>;

    async fn list_types(&self) -> Result<TypesReply, TransportError>;

    async fn stream_by_type(&self, log_type: &str) -> Result<RecordStream, TransportError>;
}

/// Drain a record stream, failing if it ends with an error frame.
pub async fn collect_records(mut stream: RecordStream) -> Result<Vec<LogRecord>, String> {
    let mut records = Vec::new();
    while let Some(frame) = stream.next().await {
        match frame {
            StreamFrame::Records(chunk) => records.extend(chunk),
            StreamFrame::Error(message) => return Err(message),
        }
    }
    Ok(records)
}
