//! Snapshot of a deployed stack's resources

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Duplicate physical resource id in stack snapshot: {0}")]
    DuplicatePhysicalId(String),
}

/// Logical to physical id pair as returned by the stack resource lister
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackResourceSummary {
    #[serde(alias = "logicalResourceId")]
    pub logical_resource_id: String,
    #[serde(alias = "physicalResourceId")]
    pub physical_resource_id: String,
}

impl StackResourceSummary {
    pub fn new(logical_resource_id: impl Into<String>, physical_resource_id: impl Into<String>) -> Self {
        Self {
            logical_resource_id: logical_resource_id.into(),
            physical_resource_id: physical_resource_id.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotRepr {
    Wrapped {
        #[serde(rename = "StackResourceSummaries", alias = "stackResourceSummaries")]
        summaries: Vec<StackResourceSummary>,
    },
    Bare(Vec<StackResourceSummary>),
}

impl TryFrom<SnapshotRepr> for StackSnapshot {
    type Error = SnapshotError;

    fn try_from(repr: SnapshotRepr) -> Result<Self, Self::Error> {
        match repr {
            SnapshotRepr::Wrapped { summaries } | SnapshotRepr::Bare(summaries) => {
                Self::try_new(summaries)
            }
        }
    }
}

/// Lookup table from physical to logical id
///
/// Physical ids are unique within one snapshot. Accepts either the lister's
/// `{"StackResourceSummaries": [...]}` shape or a bare array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotRepr")]
pub struct StackSnapshot {
    #[serde(rename = "StackResourceSummaries")]
    summaries: Vec<StackResourceSummary>,
}

impl StackSnapshot {
    pub fn try_new(summaries: Vec<StackResourceSummary>) -> Result<Self, SnapshotError> {
        let mut seen = HashSet::new();
        for summary in &summaries {
            if !seen.insert(summary.physical_resource_id.as_str()) {
                return Err(SnapshotError::DuplicatePhysicalId(
                    summary.physical_resource_id.clone(),
                ));
            }
        }
        Ok(Self { summaries })
    }

    /// Assemble a snapshot from paginated lister output
    pub fn from_pages<I>(pages: I) -> Result<Self, SnapshotError>
    where
        I: IntoIterator<Item = Vec<StackResourceSummary>>,
    {
        Self::try_new(pages.into_iter().flatten().collect())
    }

    pub fn logical_id_for(&self, physical_id: &str) -> Option<&str> {
        self.summaries
            .iter()
            .find(|s| s.physical_resource_id == physical_id)
            .map(|s| s.logical_resource_id.as_str())
    }

    pub fn summaries(&self) -> &[StackResourceSummary] {
        &self.summaries
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}
