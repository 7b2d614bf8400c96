//! Local invocation router for samp
//!
//! Resolves an invocation to the function implementation that serves it and
//! runs it either in-process or through an external runtime host reached over
//! a file spool. The runtime host itself is built and started by the
//! [`RuntimeSupervisor`].

pub mod config;
pub mod dispatch;
pub mod ipc;
pub mod native;
pub mod resolver;
pub mod supervisor;

pub use config::{BuildConfig, IpcConfig, RouterConfig};
pub use dispatch::{ExecutionPath, RouteError, Router};
pub use ipc::{IpcChannel, IpcError, SpoolDirs};
pub use native::{handler_fn, Handler, HandlerContext, HandlerError, HandlerLoader, StaticLoader};
pub use resolver::{resolve, ResolutionError};
pub use supervisor::{BuildError, BuildState, RuntimeSupervisor};
