use crate::producer::uploader::{BatchUploader, UploadError, UploadReport};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// One async mutex per path, dropped from the map once nobody holds or
/// awaits it.
#[derive(Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub async fn lock(&self, path: &Path) -> PathGuard<'_> {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(path.to_path_buf()).or_default().clone()
        };

        PathGuard {
            locks: self,
            path: path.to_path_buf(),
            guard: Some(entry.lock_owned().await),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map holds the last reference if nobody waits
        self.guard.take();

        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.path)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            map.remove(&self.path);
        }
    }
}

/// Finds files in the watch directory and hands each one to the uploader,
/// never two uploads of the same path at once.
pub struct IngestSupervisor {
    watch_dir: PathBuf,
    pattern: glob::Pattern,
    uploader: BatchUploader,
    locks: PathLocks,
    cancel: CancellationToken,
}

impl IngestSupervisor {
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        file_pattern: &str,
        uploader: BatchUploader,
        cancel: CancellationToken,
    ) -> Result<Self, SupervisorError> {
        Ok(Self {
            watch_dir: watch_dir.into(),
            pattern: glob::Pattern::new(file_pattern)?,
            uploader,
            locks: PathLocks::default(),
            cancel,
        })
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Create the watch directory if it does not exist yet.
    pub async fn ensure_watch_dir(&self) -> Result<(), SupervisorError> {
        tokio::fs::create_dir_all(&self.watch_dir)
            .await
            .map_err(|source| SupervisorError::Io {
                path: self.watch_dir.clone(),
                source,
            })
    }

    /// Matching files currently in the watch directory, sorted by path.
    pub fn list_existing(&self) -> Result<Vec<PathBuf>, SupervisorError> {
        let escaped_dir = glob::Pattern::escape(&self.watch_dir.to_string_lossy());
        let full_pattern = Path::new(&escaped_dir).join(self.pattern.as_str());

        let mut files: Vec<PathBuf> = glob::glob(&full_pattern.to_string_lossy())?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "Unreadable entry in watch directory");
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Upload every matching file already present, one at a time in path
    /// order. Returns the number of files fully uploaded.
    pub async fn process_existing(&self) -> Result<usize, SupervisorError> {
        self.ensure_watch_dir().await?;

        let files = self.list_existing()?;
        info!(
            dir = %self.watch_dir.display(),
            count = files.len(),
            "Processing existing files"
        );

        let mut uploaded = 0;
        for path in files {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.process_file(&path).await.is_some() {
                uploaded += 1;
            }
        }
        Ok(uploaded)
    }

    /// Upload one file under its path lock. `None` when the file was gone by
    /// the time the lock was acquired or the upload did not finish.
    pub async fn process_file(&self, path: &Path) -> Option<UploadReport> {
        let _guard = self.locks.lock(path).await;

        if !path.is_file() {
            debug!(path = %path.display(), "File already processed, skipping");
            return None;
        }

        match self.uploader.upload(path, &self.cancel).await {
            Ok(report) => Some(report),
            Err(UploadError::Cancelled { .. }) => {
                info!(path = %path.display(), "Upload interrupted by shutdown");
                None
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Unexpected error processing file, leaving it in place");
                None
            }
        }
    }

    /// The path an event refers to, if it names a file we should upload.
    pub fn candidate_path(&self, event: &Event) -> Option<PathBuf> {
        let path = match &event.kind {
            EventKind::Create(_) => event.paths.first(),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => None,
            EventKind::Modify(ModifyKind::Name(_)) => event.paths.last(),
            _ => None,
        }?;

        let name = path.file_name()?.to_string_lossy();
        if self.pattern.matches(&name) {
            Some(path.clone())
        } else {
            None
        }
    }

    /// Start watching the directory. Events are handled on a background task
    /// that spawns one upload per event and stops on cancellation.
    ///
    /// The watch is registered before this returns, so files created after
    /// the call are never missed.
    pub async fn watch(self: &Arc<Self>) -> Result<JoinHandle<()>, SupervisorError> {
        self.ensure_watch_dir().await?;

        // Bridge notify's callback thread into the runtime
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(256);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.watch_dir, RecursiveMode::NonRecursive)?;

        info!(
            dir = %self.watch_dir.display(),
            pattern = %self.pattern,
            "Watching for new files"
        );

        let supervisor = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _watcher = watcher;
            let mut uploads = JoinSet::new();

            loop {
                tokio::select! {
                    _ = supervisor.cancel.cancelled() => break,
                    Some(_) = uploads.join_next(), if !uploads.is_empty() => {}
                    event = rx.recv() => match event {
                        Some(Ok(event)) => {
                            if let Some(path) = supervisor.candidate_path(&event) {
                                debug!(path = %path.display(), kind = ?event.kind, "File event");
                                let supervisor = Arc::clone(&supervisor);
                                uploads.spawn(async move {
                                    supervisor.process_file(&path).await;
                                });
                            }
                        }
                        Some(Err(e)) => warn!(error = %e, "File watcher error"),
                        None => break,
                    }
                }
            }

            while uploads.join_next().await.is_some() {}
            info!("Stopped watching for new files");
        }))
    }
}
