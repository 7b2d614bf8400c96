//! Temporary project workspaces

use samp_router::SpoolDirs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

use crate::OUTPUT_DIR;

/// Errors that can occur while setting up a test workspace
#[derive(Debug, Error)]
pub enum TestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// A throwaway project directory, removed on drop
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self, TestError> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("samp-test").tempdir()?,
        })
    }

    /// Project root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join(OUTPUT_DIR)
    }

    pub fn spool(&self) -> SpoolDirs {
        SpoolDirs::new(self.output_dir())
    }

    /// Write a file relative to the project root, creating parent directories
    pub fn write(&self, relative: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<PathBuf, TestError> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_template(&self, text: &str) -> Result<PathBuf, TestError> {
        self.write("template.yaml", text)
    }

    /// Poll until `path` exists
    pub async fn wait_for_file(&self, path: &Path, timeout: std::time::Duration) -> Result<(), TestError> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if path.exists() {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(crate::HOST_POLL_MILLIS)).await;
        }
        Err(TestError::Timeout(path.display().to_string()))
    }
}
