//! Spool directory layout
//!
//! ```text
//! <root>/requests/<invocationId>   {"func": handler, "obj": request}
//! <root>/responses/<invocationId>  raw response payload
//! ```

use samp_core::InvocationRequest;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::IpcError;

pub const REQUESTS_DIR: &str = "requests";
pub const RESPONSES_DIR: &str = "responses";

/// Request file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolRequest {
    pub func: String,
    pub obj: InvocationRequest,
}

/// The requests/responses mailbox pair under one root
#[derive(Debug, Clone)]
pub struct SpoolDirs {
    root: PathBuf,
}

impl SpoolDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn requests(&self) -> PathBuf {
        self.root.join(REQUESTS_DIR)
    }

    pub fn responses(&self) -> PathBuf {
        self.root.join(RESPONSES_DIR)
    }

    pub fn request_path(&self, invocation_id: &str) -> PathBuf {
        self.requests().join(invocation_id)
    }

    pub fn response_path(&self, invocation_id: &str) -> PathBuf {
        self.responses().join(invocation_id)
    }

    /// Create both directories. Safe to call repeatedly.
    pub async fn ensure(&self) -> Result<(), IpcError> {
        fs::create_dir_all(self.requests()).await?;
        fs::create_dir_all(self.responses()).await?;
        Ok(())
    }

    /// Write a request file in one step
    ///
    /// The body goes to a temporary file under the root and is renamed into
    /// `requests/`, so a reader of that directory never sees a partial file.
    pub async fn write_request(
        &self,
        invocation_id: &str,
        request: &SpoolRequest,
    ) -> Result<PathBuf, IpcError> {
        let body = serde_json::to_vec_pretty(request)?;
        let staging = self
            .root
            .join(format!(".{}.{}.tmp", invocation_id, uuid::Uuid::new_v4().simple()));
        let target = self.request_path(invocation_id);

        fs::write(&staging, &body).await?;
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        debug!(invocation_id = %invocation_id, path = %target.display(), "Wrote request");
        Ok(target)
    }

    /// Response contents if the file exists
    pub async fn read_response(&self, invocation_id: &str) -> Result<Option<String>, IpcError> {
        match fs::read_to_string(self.response_path(invocation_id)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a request nobody answered
    pub async fn discard_request(&self, invocation_id: &str) {
        match fs::remove_file(self.request_path(invocation_id)).await {
            Ok(()) => debug!(invocation_id = %invocation_id, "Discarded stale request"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => debug!(invocation_id = %invocation_id, error = %e, "Could not discard request"),
        }
    }
}

/// Invocation ids name spool files, so they must be one plain path component
pub fn validate_invocation_id(invocation_id: &str) -> Result<(), IpcError> {
    let valid = !invocation_id.is_empty()
        && invocation_id != "."
        && invocation_id != ".."
        && !invocation_id.starts_with('.')
        && !invocation_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0');

    if valid {
        Ok(())
    } else {
        Err(IpcError::InvalidInvocationId(invocation_id.to_string()))
    }
}
