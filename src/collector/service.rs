use crate::collector::storage::{PartitionStore, StorageError};
use crate::transport::types::{LogRecord, StreamFrame, TypesReply};
use chrono::Local;
use futures::Stream;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Server-side handler for the three collector calls.
#[derive(Debug, Clone)]
pub struct CollectorService {
    store: Arc<PartitionStore>,
}

impl CollectorService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store: Arc::new(PartitionStore::new(root)),
        }
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    /// Create the storage root if needed.
    pub async fn init(&self) -> Result<(), StorageError> {
        self.store.ensure_root().await?;
        info!(root = %self.store.root().display(), "Collector storage ready");
        Ok(())
    }

    /// Persist one batch. Returns whether every type group was written.
    ///
    /// Groups written before a failure stay on disk.
    pub async fn send_batch(&self, records: Vec<LogRecord>) -> bool {
        let record_count = records.len();
        match self.persist(records).await {
            Ok(units) => {
                debug!(records = record_count, units = units, "Batch stored");
                true
            }
            Err(e) => {
                error!(error = %e, records = record_count, "SendBatch error");
                false
            }
        }
    }

    async fn persist(&self, records: Vec<LogRecord>) -> Result<usize, StorageError> {
        let date = Local::now().date_naive();

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in records {
            groups
                .entry(record.log_type)
                .or_default()
                .push(record.message);
        }

        for (log_type, messages) in &groups {
            self.store.write_unit(log_type, date, messages).await?;
        }

        Ok(groups.len())
    }

    pub async fn list_types(&self) -> TypesReply {
        match self.store.list_types().await {
            Ok(types) => TypesReply::Types(types),
            Err(e) => {
                error!(error = %e, "ListTypes error");
                TypesReply::Error(e.to_string())
            }
        }
    }

    /// One `Records` frame per storage unit; an I/O failure ends the stream
    /// with a single `Error` frame. Unknown types give an empty stream.
    pub fn stream_by_type(
        &self,
        log_type: String,
    ) -> impl Stream<Item = StreamFrame> + Send + 'static {
        let store = Arc::clone(&self.store);

        async_stream::stream! {
            let units = match store.type_units(&log_type).await {
                Ok(Some(units)) => units,
                Ok(None) => {
                    debug!(log_type = %log_type, "No stored records for type");
                    return;
                }
                Err(e) => {
                    error!(log_type = %log_type, error = %e, "StreamByType error");
                    yield StreamFrame::Error(e.to_string());
                    return;
                }
            };

            for unit in units {
                match store.read_unit(&unit).await {
                    Ok(lines) => {
                        let records = lines
                            .into_iter()
                            .map(|message| LogRecord::new(log_type.clone(), message))
                            .collect();
                        yield StreamFrame::Records(records);
                    }
                    Err(e) => {
                        error!(log_type = %log_type, error = %e, "StreamByType error");
                        yield StreamFrame::Error(e.to_string());
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    async fn frames(service: &CollectorService, log_type: &str) -> Vec<StreamFrame> {
        service
            .stream_by_type(log_type.to_string())
            .collect::<Vec<_>>()
            .await
    }

    fn messages(frames: &[StreamFrame]) -> Vec<String> {
        let mut out = Vec::new();
        for frame in frames {
            match frame {
                StreamFrame::Records(records) => {
                    out.extend(records.iter().map(|r| r.message.clone()))
                }
                StreamFrame::Error(e) => panic!("unexpected error frame: {}", e),
            }
        }
        out
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let service = CollectorService::new(dir.path());
        service.init().await.unwrap();

        assert!(
            service
                .send_batch(vec![LogRecord::new("T", "m1"), LogRecord::new("T", "m2")])
                .await
        );

        let frames = frames(&service, "T").await;
        let mut got = messages(&frames);
        got.sort();
        assert_eq!(got, vec!["m1", "m2"]);
        for frame in &frames {
            if let StreamFrame::Records(records) = frame {
                assert!(records.iter().all(|r| r.log_type == "T"));
            }
        }
    }

    #[tokio::test]
    async fn test_one_unit_per_type_per_call() {
        let dir = TempDir::new().unwrap();
        let service = CollectorService::new(dir.path());
        service.init().await.unwrap();

        let batch = vec![
            LogRecord::new("a", "a1"),
            LogRecord::new("b", "b1"),
            LogRecord::new("a", "a2"),
        ];
        assert!(service.send_batch(batch).await);

        let a_units = service.store().type_units("a").await.unwrap().unwrap();
        let b_units = service.store().type_units("b").await.unwrap().unwrap();
        assert_eq!(a_units.len(), 1);
        assert_eq!(b_units.len(), 1);
        assert_eq!(std::fs::read_to_string(&a_units[0]).unwrap(), "a1\na2");
    }

    #[tokio::test]
    async fn test_unknown_type_is_empty_stream() {
        let dir = TempDir::new().unwrap();
        let service = CollectorService::new(dir.path());
        service.init().await.unwrap();

        assert!(frames(&service, "nonexistent-type").await.is_empty());
    }

    #[tokio::test]
    async fn test_list_types_empty_root() {
        let dir = TempDir::new().unwrap();
        let service = CollectorService::new(dir.path());
        service.init().await.unwrap();

        assert_eq!(service.list_types().await, TypesReply::Types(vec![]));
    }

    #[tokio::test]
    async fn test_list_types_reports_unreadable_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, "file").unwrap();

        let service = CollectorService::new(&root);
        assert!(matches!(service.list_types().await, TypesReply::Error(_)));
    }

    #[tokio::test]
    async fn test_send_batch_rejects_on_write_failure() {
        let dir = TempDir::new().unwrap();
        let service = CollectorService::new(dir.path());
        service.init().await.unwrap();

        // A plain file where the type directory should go
        std::fs::write(dir.path().join("blocked"), "x").unwrap();

        let accepted = service
            .send_batch(vec![LogRecord::new("blocked", "m1")])
            .await;
        assert!(!accepted);
    }

    #[tokio::test]
    async fn test_partial_write_is_not_rolled_back() {
        let dir = TempDir::new().unwrap();
        let service = CollectorService::new(dir.path());
        service.init().await.unwrap();
        std::fs::write(dir.path().join("zz"), "x").unwrap();

        // Groups are written in type order: "aa" lands before "zz" fails
        let accepted = service
            .send_batch(vec![LogRecord::new("zz", "z1"), LogRecord::new("aa", "a1")])
            .await;
        assert!(!accepted);
        assert_eq!(messages(&frames(&service, "aa").await), vec!["a1"]);
    }

    #[tokio::test]
    async fn test_concurrent_sends_same_type() {
        let dir = TempDir::new().unwrap();
        let service = CollectorService::new(dir.path());
        service.init().await.unwrap();

        let (first, second) = tokio::join!(
            service.send_batch(vec![LogRecord::new("T", "first")]),
            service.send_batch(vec![LogRecord::new("T", "second")]),
        );
        assert!(first && second);

        let mut got = messages(&frames(&service, "T").await);
        got.sort();
        assert_eq!(got, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_empty_batch_accepted() {
        let dir = TempDir::new().unwrap();
        let service = CollectorService::new(dir.path());
        service.init().await.unwrap();

        assert!(service.send_batch(Vec::new()).await);
        assert_eq!(service.list_types().await, TypesReply::Types(vec![]));
    }
}
