//! Stand-in for the external runtime host

use samp_router::ipc::SpoolRequest;
use samp_router::SpoolDirs;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::HOST_POLL_MILLIS;

/// Serves the far end of the spool: reads each new request file and writes
/// the responder's answer under the same invocation id
pub struct FakeRuntimeHost {
    task: JoinHandle<()>,
    served: Arc<AtomicUsize>,
}

impl FakeRuntimeHost {
    pub fn spawn<F>(spool: SpoolDirs, respond: F) -> Self
    where
        F: Fn(&SpoolRequest) -> String + Send + 'static,
    {
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();

        let task = tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                tokio::time::sleep(Duration::from_millis(HOST_POLL_MILLIS)).await;

                let Ok(mut entries) = tokio::fs::read_dir(spool.requests()).await else {
                    continue;
                };
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if !seen.insert(name.clone()) {
                        continue;
                    }

                    let request: SpoolRequest = match tokio::fs::read(entry.path())
                        .await
                        .map_err(|e| e.to_string())
                        .and_then(|b| serde_json::from_slice(&b).map_err(|e| e.to_string()))
                    {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(file = %name, error = %e, "Fake host could not read request");
                            continue;
                        }
                    };

                    let body = respond(&request);
                    if let Err(e) = write_response(&spool, &name, &body).await {
                        warn!(file = %name, error = %e, "Fake host could not write response");
                        continue;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    debug!(invocation_id = %name, "Fake host responded");
                }
            }
        });

        Self { task, served }
    }

    /// Host that answers every request with the request's event as JSON
    pub fn echo(spool: SpoolDirs) -> Self {
        Self::spawn(spool, |request| request.obj.event.to_string())
    }

    /// Number of responses written so far
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for FakeRuntimeHost {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_response(spool: &SpoolDirs, invocation_id: &str, body: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(spool.responses()).await?;
    let staging = spool
        .root()
        .join(format!(".response.{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&staging, body).await?;
    tokio::fs::rename(&staging, spool.response_path(invocation_id)).await
}
