//! Test utilities for samp
//!
//! Provides utilities for exercising the router without a real runtime host:
//! - Temporary project workspaces with a spool directory
//! - A fake runtime host answering spooled requests
//! - A directory watcher driven by hand
//!
//! ## Usage
//!
//! ```rust,no_run
//! use samp_test::{FakeRuntimeHost, TestWorkspace};
//!
//! #[tokio::test]
//! async fn test_bridge() {
//!     let workspace = TestWorkspace::new().unwrap();
//!     let host = FakeRuntimeHost::spawn(workspace.spool(), |req| req.func.clone());
//!
//!     // Route invocations with a channel on workspace.spool()
//!
//!     assert_eq!(host.served(), 0);
//! }
//! ```

pub mod host;
pub mod watcher;
pub mod workspace;

pub use host::FakeRuntimeHost;
pub use watcher::ManualWatcher;
pub use workspace::{TestError, TestWorkspace};

use std::sync::Once;

/// Output directory name used by test workspaces
pub const OUTPUT_DIR: &str = ".samp-out";

/// How often the fake runtime host scans for requests
pub const HOST_POLL_MILLIS: u64 = 10;

static TRACING: Once = Once::new();

/// Route tracing output through the test harness, once per process
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "samp=debug".into());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
