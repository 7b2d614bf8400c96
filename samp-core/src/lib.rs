//! Core types for samp
//!
//! This crate provides the data model shared by the router, the template
//! resolver and the CLI.

pub mod error;
pub mod function;
pub mod invocation;
pub mod stack;

pub use error::{ErrorKind, ErrorPayload};
pub use function::{FunctionRecord, FunctionRecords, RuntimeLanguage};
pub use invocation::{
    InvocationContext, InvocationEnv, InvocationOutput, InvocationRequest, LOCAL_DEBUG_VAR,
};
pub use stack::{SnapshotError, StackResourceSummary, StackSnapshot};
