//! File-based exchange with an external runtime host
//!
//! A request is written to `requests/<invocationId>`; the runtime host answers
//! by creating `responses/<invocationId>`. One watch on the responses
//! directory serves every pending exchange. Each exchange registers its
//! invocation id before its request is written and is removed again when
//! the response arrives, the wait times out, or the caller goes away.

pub mod spool;
pub mod watch;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use samp_core::{ErrorKind, InvocationRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::IpcConfig;
pub use spool::{validate_invocation_id, SpoolDirs, SpoolRequest};
pub use watch::{DirectoryWatcher, FileEvent, FileEventKind, NotifyWatcher, WatchStream};

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("No response for invocation {invocation_id} after {after:?}")]
    Timeout {
        invocation_id: String,
        after: Duration,
    },

    #[error("Invocation {0} already has a pending exchange")]
    DuplicateInvocation(String),

    #[error("Invalid invocation id: {0:?}")]
    InvalidInvocationId(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Response channel closed")]
    Closed,
}

impl IpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::DuplicateInvocation(_) => ErrorKind::DuplicateInvocation,
            _ => ErrorKind::Ipc,
        }
    }
}

type ResponseResult = Result<String, IpcError>;

struct Pending {
    token: u64,
    tx: oneshot::Sender<ResponseResult>,
}

type PendingMap = DashMap<String, Pending>;

/// Removes its own pending entry when the exchange ends for any reason
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    invocation_id: &'a str,
    token: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .remove_if(self.invocation_id, |_, p| p.token == self.token);
    }
}

/// Request/response exchange through the spool directories
pub struct IpcChannel {
    spool: SpoolDirs,
    config: IpcConfig,
    watcher: Arc<dyn DirectoryWatcher>,
    pending: Arc<PendingMap>,
    next_token: AtomicU64,
    watch: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl IpcChannel {
    /// Channel using `notify`, polling when the config asks for it
    pub fn new(spool: SpoolDirs, config: IpcConfig) -> Self {
        let watcher = match config.poll_interval() {
            Some(interval) => NotifyWatcher::polling(interval),
            None => NotifyWatcher::native(),
        };
        Self::with_watcher(spool, config, Arc::new(watcher))
    }

    pub fn with_watcher(
        spool: SpoolDirs,
        config: IpcConfig,
        watcher: Arc<dyn DirectoryWatcher>,
    ) -> Self {
        Self {
            spool,
            config,
            watcher,
            pending: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(0),
            watch: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn spool(&self) -> &SpoolDirs {
        &self.spool
    }

    /// Number of exchanges currently waiting for a response
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether the responses watch is running
    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Send a request to the runtime host and wait for its response
    pub async fn exchange(
        &self,
        handler: &str,
        request: &InvocationRequest,
    ) -> Result<String, IpcError> {
        let invocation_id = request.invocation_id();
        validate_invocation_id(invocation_id)?;
        if self.cancel.is_cancelled() {
            return Err(IpcError::Closed);
        }

        self.spool.ensure().await?;
        self.arm()?;

        let (rx, token) = self.register(invocation_id)?;
        let _guard = PendingGuard {
            pending: &self.pending,
            invocation_id,
            token,
        };
        if self.cancel.is_cancelled() {
            return Err(IpcError::Closed);
        }

        let spool_request = SpoolRequest {
            func: handler.to_string(),
            obj: request.clone(),
        };
        self.spool.write_request(invocation_id, &spool_request).await?;

        // The response may have landed before the watch saw anything
        let existing = self.spool.response_path(invocation_id);
        if tokio::fs::try_exists(&existing).await.unwrap_or(false) {
            self.deliver_settled(invocation_id);
        }

        let bound = self.config.response_timeout();
        match tokio::time::timeout(bound, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IpcError::Closed),
            Err(_) => {
                warn!(invocation_id = %invocation_id, timeout = ?bound, "No response from runtime host");
                self.spool.discard_request(invocation_id).await;
                Err(IpcError::Timeout {
                    invocation_id: invocation_id.to_string(),
                    after: bound,
                })
            }
        }
    }

    /// Stop watching the responses directory
    ///
    /// Pending exchanges fail with [`IpcError::Closed`], as do later ones.
    pub fn close(&self) {
        self.cancel.cancel();
        let ids: Vec<String> = self.pending.iter().map(|p| p.key().clone()).collect();
        for invocation_id in ids {
            complete(&self.pending, &invocation_id, Err(IpcError::Closed));
        }
    }

    fn register(&self, invocation_id: &str) -> Result<(oneshot::Receiver<ResponseResult>, u64), IpcError> {
        match self.pending.entry(invocation_id.to_string()) {
            Entry::Occupied(_) => Err(IpcError::DuplicateInvocation(invocation_id.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                slot.insert(Pending { token, tx });
                Ok((rx, token))
            }
        }
    }

    fn deliver_settled(&self, invocation_id: &str) {
        tokio::spawn(settle_and_deliver(
            self.spool.clone(),
            self.pending.clone(),
            invocation_id.to_string(),
            self.config.settle(),
        ));
    }

    /// Start the shared responses watch, or restart it if it has ended
    fn arm(&self) -> Result<(), IpcError> {
        let mut watch = self.watch.lock();
        if watch.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        if watch.is_some() {
            debug!("Restarting responses watch");
        }

        let mut stream = self.watcher.watch(&self.spool.responses())?;
        let spool = self.spool.clone();
        let pending = self.pending.clone();
        let cancel = self.cancel.clone();
        let settle = self.config.settle();

        *watch = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = stream.recv() => match event {
                        Some(event) => deliver(&spool, &pending, &event, settle).await,
                        None => {
                            warn!("Responses watch ended");
                            break;
                        }
                    },
                }
            }
            debug!("Responses watch stopped");
        }));
        Ok(())
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Match a response event against the pending exchanges
///
/// A renamed-in or closed file is complete and read at once. A created or
/// modified file may still be in flight, so it is read after the settle
/// delay. Whatever is there then, empty or not, is the response.
async fn deliver(spool: &SpoolDirs, pending: &Arc<PendingMap>, event: &FileEvent, settle: Duration) {
    let Some(invocation_id) = event.file_name() else {
        return;
    };
    if !pending.contains_key(invocation_id) {
        trace!(file = %invocation_id, "Ignoring response with no pending exchange");
        return;
    }

    match event.kind {
        FileEventKind::MovedIn | FileEventKind::Closed => {
            read_and_complete(spool, pending, invocation_id).await;
        }
        FileEventKind::Created | FileEventKind::Written => {
            tokio::spawn(settle_and_deliver(
                spool.clone(),
                pending.clone(),
                invocation_id.to_string(),
                settle,
            ));
        }
    }
}

async fn settle_and_deliver(
    spool: SpoolDirs,
    pending: Arc<PendingMap>,
    invocation_id: String,
    settle: Duration,
) {
    tokio::time::sleep(settle).await;
    read_and_complete(&spool, &pending, &invocation_id).await;
}

async fn read_and_complete(spool: &SpoolDirs, pending: &PendingMap, invocation_id: &str) {
    if !pending.contains_key(invocation_id) {
        return;
    }
    match spool.read_response(invocation_id).await {
        Ok(Some(body)) => {
            complete(pending, invocation_id, Ok(body));
        }
        Ok(None) => {}
        Err(e) => {
            complete(pending, invocation_id, Err(e));
        }
    }
}

fn complete(pending: &PendingMap, invocation_id: &str, result: ResponseResult) -> bool {
    match pending.remove(invocation_id) {
        Some((_, p)) => {
            debug!(invocation_id = %invocation_id, ok = result.is_ok(), "Response received");
            let _ = p.tx.send(result);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samp_core::InvocationContext;
    use serde_json::json;

    fn request(id: &str) -> InvocationRequest {
        InvocationRequest::new(json!({"order": 7}), InvocationContext::new("fn", id))
    }

    fn channel(root: &std::path::Path, timeout_secs: u64) -> IpcChannel {
        let config = IpcConfig {
            response_timeout_secs: timeout_secs,
            poll_interval_ms: Some(20),
            ..IpcConfig::default()
        };
        IpcChannel::new(SpoolDirs::new(root), config)
    }

    #[tokio::test]
    async fn test_pre_existing_response_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(dir.path(), 5);
        channel.spool().ensure().await.unwrap();
        std::fs::write(channel.spool().response_path("req-1"), "X").unwrap();

        let body = channel.exchange("app.handler", &request("req-1")).await.unwrap();
        assert_eq!(body, "X");
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_empty_pre_existing_response_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(dir.path(), 5);
        channel.spool().ensure().await.unwrap();
        std::fs::write(channel.spool().response_path("req-empty"), "").unwrap();

        let body = channel.exchange("app.handler", &request("req-empty")).await.unwrap();
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_later_exchanges() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(channel(dir.path(), 5));

        let waiting = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.exchange("app.handler", &request("req-3")).await })
        };
        while channel.pending() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        channel.close();
        assert!(matches!(waiting.await.unwrap(), Err(IpcError::Closed)));
        assert!(matches!(
            channel.exchange("app.handler", &request("req-4")).await,
            Err(IpcError::Closed)
        ));
        assert_eq!(channel.pending(), 0);
        assert!(!channel.spool().request_path("req-4").exists());
    }

    #[tokio::test]
    async fn test_timeout_discards_request() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(dir.path(), 1);

        let err = channel.exchange("app.handler", &request("req-2")).await.unwrap_err();
        assert!(matches!(err, IpcError::Timeout { ref invocation_id, .. } if invocation_id == "req-2"));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!channel.spool().request_path("req-2").exists());
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_invalid_id_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".samp-out");
        let channel = channel(&root, 1);

        let err = channel.exchange("h", &request("../escape")).await.unwrap_err();
        assert!(matches!(err, IpcError::InvalidInvocationId(_)));
        assert!(!root.exists());
    }

    #[test]
    fn test_guard_keeps_newer_registration() {
        let pending = PendingMap::new();
        let (tx, _rx) = oneshot::channel();
        pending.insert("id".to_string(), Pending { token: 2, tx });

        drop(PendingGuard {
            pending: &pending,
            invocation_id: "id",
            token: 1,
        });
        assert!(pending.contains_key("id"));
    }
}
