use crate::transport::types::{LogRecord, SendBatchResponse, StreamFrame, TypesReply};
use crate::transport::{RecordStream, TransportChannel, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, TransportError>;

/// HTTP/JSON client for a collector.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct SendBatchBody<'a> {
    records: &'a [LogRecord],
}

impl HttpTransport {
    /// `timeout` bounds unary calls and connection setup; streams run until the
    /// collector closes them.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl {
                url: base_url.to_string(),
                message: "URL cannot be used as a base".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self {
            base_url,
            client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        Err(TransportError::Collector {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

/// The collector counts as unreachable when the connection could not be made,
/// timed out, or was closed or reset before a complete reply arrived. A reply
/// that arrived but does not decode is not retried.
fn classify(error: reqwest::Error) -> TransportError {
    let dropped = error.is_request() || (error.is_body() && !error.is_decode());
    if error.is_connect() || error.is_timeout() || dropped {
        TransportError::Unavailable(error.to_string())
    } else {
        TransportError::Http(error)
    }
}

#[async_trait]
impl TransportChannel for HttpTransport {
    async fn send_batch(&self, records: &[LogRecord]) -> Result<bool> {
        let url = self.endpoint(&["logs", "batch"]);
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&SendBatchBody { records })
            .send()
            .await
            .map_err(classify)?;

        let response = Self::check_status(response).await?;
        let reply: SendBatchResponse = response.json().await.map_err(classify)?;
        Ok(reply.accepted)
    }

    async fn list_types(&self) -> Result<TypesReply> {
        let url = self.endpoint(&["logs", "types"]);
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify)?;

        // Unreadable storage comes back as a structured body, not a status code.
        let response = Self::check_status(response).await?;
        response.json().await.map_err(classify)
    }

    async fn stream_by_type(&self, log_type: &str) -> Result<RecordStream> {
        let url = self.endpoint(&["logs", "types", log_type, "records"]);
        let response = self.client.get(url).send().await.map_err(classify)?;
        let response = Self::check_status(response).await?;

        let mut body = response.bytes_stream();
        let frames = async_stream::stream! {
            let mut pending: Vec<u8> = Vec::new();
            loop {
                match body.next().await {
                    Some(Ok(chunk)) => {
                        pending.extend_from_slice(&chunk);
                        while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = pending.drain(..=newline).collect();
                            if let Some(frame) = decode_frame(&line) {
                                let terminal = frame.is_error();
                                yield frame;
                                if terminal {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        yield StreamFrame::Error(format!("stream interrupted: {}", e));
                        return;
                    }
                    None => {
                        if let Some(frame) = decode_frame(&pending) {
                            yield frame;
                        }
                        return;
                    }
                }
            }
        };

        Ok(frames.boxed())
    }
}

/// Decode one NDJSON line. Blank lines yield nothing; garbage becomes a
/// terminal error frame.
fn decode_frame(line: &[u8]) -> Option<StreamFrame> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str(trimmed)
            .unwrap_or_else(|e| StreamFrame::Error(format!("undecodable frame: {}", e))),
    )
}
