//! Hand-driven directory watcher

use parking_lot::Mutex;
use samp_router::ipc::{DirectoryWatcher, FileEvent, FileEventKind, WatchStream};
use samp_router::IpcError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Watcher that only reports the events a test emits
#[derive(Clone, Default)]
pub struct ManualWatcher {
    watches: Arc<Mutex<Vec<(PathBuf, mpsc::UnboundedSender<FileEvent>)>>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories currently watched
    pub fn watched(&self) -> Vec<PathBuf> {
        self.watches
            .lock()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(dir, _)| dir.clone())
            .collect()
    }

    /// Report `file_name` as created in every watched directory
    pub fn emit_created(&self, file_name: &str) {
        self.emit(file_name, FileEventKind::Created);
    }

    /// End every watch stream, as if the watched directories went away
    pub fn end_watches(&self) {
        self.watches.lock().clear();
    }

    pub fn emit(&self, file_name: &str, kind: FileEventKind) {
        for (dir, tx) in self.watches.lock().iter() {
            let _ = tx.send(FileEvent::new(dir.join(file_name), kind));
        }
    }
}

impl DirectoryWatcher for ManualWatcher {
    fn watch(&self, dir: &Path) -> Result<WatchStream, IpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches.lock().push((dir.to_path_buf(), tx));
        Ok(WatchStream::new(rx, ()))
    }
}
