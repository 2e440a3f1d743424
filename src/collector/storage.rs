use chrono::{NaiveDate, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// 100ns ticks between 0001-01-01 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

const UNIT_PREFIX: &str = "batch_";
const UNIT_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("type name '{0}' cannot be used as a directory name")]
    InvalidType(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// On-disk layout `{root}/{type}/{yyyy-MM-dd}/batch_{ticks}_{seq}.json`.
///
/// Units are created with `create_new` and never reopened for writing.
#[derive(Debug)]
pub struct PartitionStore {
    root: PathBuf,
    sequence: AtomicU64,
}

impl PartitionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.at(&self.root)
    }

    /// Write one storage unit holding `messages` newline-joined.
    pub async fn write_unit(
        &self,
        log_type: &str,
        date: NaiveDate,
        messages: &[String],
    ) -> Result<PathBuf> {
        if !is_valid_type_name(log_type) {
            return Err(StorageError::InvalidType(log_type.to_string()));
        }

        let dir = self
            .root
            .join(log_type)
            .join(date.format("%Y-%m-%d").to_string());
        // create_dir_all succeeds when a concurrent caller created it first
        tokio::fs::create_dir_all(&dir).await.at(&dir)?;

        let content = messages.join("\n");
        loop {
            let path = dir.join(self.next_unit_name());
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::Io { path, source: e }),
            };

            let written = async {
                file.write_all(content.as_bytes()).await?;
                file.sync_all().await
            }
            .await;
            drop(file);
            discard_on_error(&path, written).await?;
            return Ok(path);
        }
    }

    /// Immediate subdirectory names of the root, sorted.
    pub async fn list_types(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.at(&self.root)?;
        let mut types = Vec::new();

        while let Some(entry) = entries.next_entry().await.at(&self.root)? {
            let file_type = entry.file_type().await.at(&entry.path())?;
            if file_type.is_dir() {
                types.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        types.sort();
        Ok(types)
    }

    /// All storage units under `{root}/{type}`, sorted by path.
    ///
    /// `None` when the type has never been written.
    pub async fn type_units(&self, log_type: &str) -> Result<Option<Vec<PathBuf>>> {
        if !is_valid_type_name(log_type) {
            return Ok(None);
        }

        let type_dir = self.root.join(log_type);
        match tokio::fs::metadata(&type_dir).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io {
                    path: type_dir,
                    source: e,
                })
            }
        }

        let mut units = Vec::new();
        let mut pending = vec![type_dir];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.at(&dir)?;
            while let Some(entry) = entries.next_entry().await.at(&dir)? {
                let path = entry.path();
                let file_type = entry.file_type().await.at(&path)?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && is_unit_file(&path) {
                    units.push(path);
                }
            }
        }

        units.sort();
        Ok(Some(units))
    }

    pub async fn read_unit(&self, path: &Path) -> Result<Vec<String>> {
        let content = tokio::fs::read_to_string(path).await.at(path)?;
        Ok(split_unit(&content))
    }

    fn next_unit_name(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}{}_{}.{}", UNIT_PREFIX, ticks_now(), seq, UNIT_EXTENSION)
    }
}

/// Inverse of the newline join in `write_unit`, empty messages included.
fn split_unit(content: &str) -> Vec<String> {
    content.split('\n').map(str::to_string).collect()
}

/// A unit that failed to write must not be served later as a short batch.
async fn discard_on_error(path: &Path, written: std::io::Result<()>) -> Result<()> {
    if let Err(source) = written {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove partial storage unit");
        }
        return Err(StorageError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// A type must map onto exactly one normal path component.
pub(crate) fn is_valid_type_name(log_type: &str) -> bool {
    if log_type.is_empty() || log_type.contains(['/', '\\']) {
        return false;
    }

    let mut components = Path::new(log_type).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_unit_file(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(UNIT_PREFIX));
    let ext_ok = path.extension().is_some_and(|e| e == UNIT_EXTENSION);
    name_ok && ext_ok
}

/// 100 ns intervals since 0001-01-01T00:00:00Z.
pub(crate) fn ticks_now() -> i64 {
    let now = Utc::now();
    UNIX_EPOCH_TICKS + now.timestamp() * 10_000_000 + i64::from(now.timestamp_subsec_nanos() / 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    #[tokio::test]
    async fn test_write_unit_layout() {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path());

        let path = store
            .write_unit("audit", date(), &["m1".to_string(), "m2".to_string()])
            .await
            .unwrap();

        assert_eq!(path.parent().unwrap(), dir.path().join("audit/2026-10-18"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("batch_"));
        assert!(name.ends_with(".json"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "m1\nm2");
    }

    #[tokio::test]
    async fn test_units_never_collide() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(PartitionStore::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .write_unit("audit", date(), &[format!("m{}", i)])
                    .await
                    .unwrap()
            }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 16);

        let units = store.type_units("audit").await.unwrap().unwrap();
        assert_eq!(units.len(), 16);
    }

    #[tokio::test]
    async fn test_list_types_on_empty_root() {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path());
        assert!(store.list_types().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_types_ignores_plain_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("beta")).unwrap();
        std::fs::create_dir(dir.path().join("alpha")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), "x").unwrap();

        let store = PartitionStore::new(dir.path());
        assert_eq!(store.list_types().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_list_types_unreadable_root() {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path().join("missing"));
        assert!(matches!(
            store.list_types().await,
            Err(StorageError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_type_units_missing_type() {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path());
        assert!(store.type_units("nope").await.unwrap().is_none());
        assert!(store.type_units("..").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_type_units_recurses_dates() {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path());
        let day1 = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();

        store.write_unit("audit", day1, &["old".to_string()]).await.unwrap();
        store.write_unit("audit", date(), &["new".to_string()]).await.unwrap();
        std::fs::write(dir.path().join("audit/notes.txt"), "ignored").unwrap();

        let units = store.type_units("audit").await.unwrap().unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(store.read_unit(&units[0]).await.unwrap(), vec!["old"]);
        assert_eq!(store.read_unit(&units[1]).await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn test_invalid_type_names_rejected() {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path());

        for bad in ["", ".", "..", "a/b", "..\\x"] {
            let result = store.write_unit(bad, date(), &["m".to_string()]).await;
            assert!(
                matches!(result, Err(StorageError::InvalidType(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_empty_messages_survive_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path());

        for messages in [vec!["", ""], vec!["a", "", "b"], vec![""], vec!["x", ""]] {
            let messages: Vec<String> = messages.into_iter().map(String::from).collect();
            let path = store.write_unit("blank", date(), &messages).await.unwrap();
            assert_eq!(store.read_unit(&path).await.unwrap(), messages);
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_unit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch_1_0.json");
        std::fs::write(&path, "half").unwrap();

        let result = discard_on_error(&path, Err(std::io::Error::new(ErrorKind::Other, "disk full"))).await;

        assert!(matches!(result, Err(StorageError::Io { .. })));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_successful_write_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch_1_0.json");
        std::fs::write(&path, "whole").unwrap();

        discard_on_error(&path, Ok(())).await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_ticks_are_after_unix_epoch() {
        assert!(ticks_now() > UNIX_EPOCH_TICKS);
    }
}
