//! Physical function identifier to function record resolution

use samp_core::{ErrorKind, FunctionRecord, FunctionRecords, StackSnapshot};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No stack resource with physical id {0}")]
    UnknownPhysicalId(String),

    #[error("No function record for logical id {logical_id} (physical id {physical_id})")]
    UnknownLogicalId {
        logical_id: String,
        physical_id: String,
    },
}

impl ResolutionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Resolution
    }
}

/// Resolve the function record for a deployed function's physical id
pub fn resolve<'a>(
    physical_id: &str,
    snapshot: &StackSnapshot,
    functions: &'a FunctionRecords,
) -> Result<&'a FunctionRecord, ResolutionError> {
    let logical_id = snapshot
        .logical_id_for(physical_id)
        .ok_or_else(|| ResolutionError::UnknownPhysicalId(physical_id.to_string()))?;

    functions
        .get(logical_id)
        .ok_or_else(|| ResolutionError::UnknownLogicalId {
            logical_id: logical_id.to_string(),
            physical_id: physical_id.to_string(),
        })
}
