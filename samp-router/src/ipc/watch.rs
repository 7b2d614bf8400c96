//! Directory change notifications
//!
//! The channel only needs to learn that a file appeared in a directory. The
//! [`DirectoryWatcher`] trait yields those events as a stream; the default
//! implementation sits on `notify`, either with native OS notifications or a
//! polling backend.

use notify::event::{AccessKind, AccessMode, EventKind, ModifyKind, RenameMode};
use notify::{PollWatcher, RecursiveMode, Watcher};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::IpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// A new file appeared; its contents may still be in flight
    Created,
    /// A file's contents changed; more writes may follow
    Written,
    /// A writer closed the file
    Closed,
    /// A file was renamed into the directory, complete
    MovedIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Stream of events for one watched directory
///
/// Dropping the stream stops the underlying watch.
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<FileEvent>,
    _guard: Box<dyn Any + Send>,
}

impl WatchStream {
    pub fn new<G>(rx: mpsc::UnboundedReceiver<FileEvent>, guard: G) -> Self
    where
        G: Any + Send,
    {
        Self {
            rx,
            _guard: Box::new(guard),
        }
    }

    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }
}

/// Capability to watch a directory for file creation
pub trait DirectoryWatcher: Send + Sync {
    fn watch(&self, dir: &Path) -> Result<WatchStream, IpcError>;
}

/// `notify` backed watcher
#[derive(Debug, Clone, Default)]
pub struct NotifyWatcher {
    poll_interval: Option<Duration>,
}

impl NotifyWatcher {
    /// Native OS notifications
    pub fn native() -> Self {
        Self::default()
    }

    /// Periodic directory scans
    pub fn polling(interval: Duration) -> Self {
        Self {
            poll_interval: Some(interval),
        }
    }
}

impl DirectoryWatcher for NotifyWatcher {
    fn watch(&self, dir: &Path) -> Result<WatchStream, IpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                for file_event in translate(event) {
                    let _ = tx.send(file_event);
                }
            }
            Err(e) => warn!(error = %e, "Directory watch error"),
        };

        let stream = if let Some(interval) = self.poll_interval {
            let config = notify::Config::default().with_poll_interval(interval);
            let mut watcher = PollWatcher::new(handler, config)?;
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            WatchStream::new(rx, watcher)
        } else {
            let mut watcher = notify::recommended_watcher(handler)?;
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            WatchStream::new(rx, watcher)
        };

        debug!(dir = %dir.display(), polling = ?self.poll_interval, "Watching directory");
        Ok(stream)
    }
}

fn translate(event: notify::Event) -> Vec<FileEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FileEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths are [from, to]
            return event
                .paths
                .into_iter()
                .nth(1)
                .map(|path| FileEvent::new(path, FileEventKind::MovedIn))
                .into_iter()
                .collect();
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) => FileEventKind::MovedIn,
        EventKind::Modify(_) => FileEventKind::Written,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => FileEventKind::Closed,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| FileEvent::new(path, kind))
        .collect()
}
