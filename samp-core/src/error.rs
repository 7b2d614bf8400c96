//! Error taxonomy and the structured error payload

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of failure the router can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No stack resource or function record for the invoked identifier
    Resolution,
    /// A native handler failed, panicked, or could not be loaded
    Handler,
    /// The external build tool failed or never signalled completion
    Build,
    /// No response was observed within the configured bound
    Timeout,
    /// An invocation id was reused while its first exchange was pending
    DuplicateInvocation,
    /// Spool or watch failure on the cross-process path
    Ipc,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolution => "ResolutionError",
            Self::Handler => "HandlerError",
            Self::Build => "BuildError",
            Self::Timeout => "Timeout",
            Self::DuplicateInvocation => "DuplicateInvocationError",
            Self::Ipc => "IpcError",
        }
    }

    /// Fatal kinds affect every invocation sharing the runtime host and are
    /// surfaced as session-level errors instead of invocation results.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Resolution | Self::Handler => false,
            Self::Build | Self::Timeout | Self::DuplicateInvocation | Self::Ipc => true,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invocation-level failure as returned to the caller: `{"error": message}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.error })
    }
}
