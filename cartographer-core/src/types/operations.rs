//! Pass results

use serde::{Deserialize, Serialize};

/// A per-room or per-file problem that did not stop the pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub err: String,
    pub file: String,
}

impl OperationError {
    pub fn new(err: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            err: err.into(),
            file: file.into(),
        }
    }
}

/// Counters of a sync pass
///
/// Every loaded room lands in exactly one of `created`, `updated` or
/// `skipped`. Rooms rejected by validation never reach the tree and are
/// counted in `not_written`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operations {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub not_written: usize,
    pub errors: Vec<OperationError>,
}

impl Operations {
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.skipped
    }
}

/// Result of rebuilding a monolithic map from the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResults {
    pub rooms_processed: usize,
    pub errors: Vec<OperationError>,
}
