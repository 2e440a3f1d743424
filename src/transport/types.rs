use serde::{Deserialize, Serialize};

/// One line of a producer file, tagged with its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub log_type: String,

    /// The original line, passed through verbatim
    pub message: String,
}

impl LogRecord {
    pub fn new(log_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            log_type: log_type.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBatchRequest {
    pub records: Vec<LogRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SendBatchResponse {
    pub accepted: bool,
}

/// `{"types": [...]}` or `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypesReply {
    Types(Vec<String>),
    Error(String),
}

/// One element of a StreamByType response.
///
/// An `Error` frame is always the last one and means the whole read failed;
/// it is never a synonym for "no more data".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFrame {
    Records(Vec<LogRecord>),
    Error(String),
}

impl StreamFrame {
    pub fn is_error(&self) -> bool {
        matches!(self, StreamFrame::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_record_uses_type_key() {
        let record = LogRecord::new("audit", r#"{"type":"audit"}"#);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "audit");
        assert_eq!(json["message"], r#"{"type":"audit"}"#);
    }

    #[test]
    fn test_frames_are_tagged() {
        let data = serde_json::to_string(&StreamFrame::Records(vec![LogRecord::new("a", "m")]))
            .unwrap();
        assert!(data.starts_with(r#"{"records":"#));

        let error = serde_json::to_string(&StreamFrame::Error("disk gone".into())).unwrap();
        assert_eq!(error, r#"{"error":"disk gone"}"#);
        assert!(serde_json::from_str::<StreamFrame>(&error).unwrap().is_error());
    }

    #[test]
    fn test_types_reply_shapes() {
        let reply: TypesReply = serde_json::from_str(r#"{"types":["a","b"]}"#).unwrap();
        assert_eq!(reply, TypesReply::Types(vec!["a".into(), "b".into()]));

        let reply: TypesReply = serde_json::from_str(r#"{"error":"unreadable"}"#).unwrap();
        assert_eq!(reply, TypesReply::Error("unreadable".into()));
    }
}
