//! Backend session handles
//!
//! Handles are opaque strings, but the backend prefixes them by origin:
//! `csv_N` for a registered dataset and `audit_N` for a completed audit.
//! Result retrieval only makes sense for the latter.

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DATASET_HANDLE_PREFIX: &str = "csv_";
pub const AUDIT_HANDLE_PREFIX: &str = "audit_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Dataset registered, no audit has run under this handle
    Dataset,
    /// Completed audit
    Audit,
    /// Unrecognized prefix; treated as usable
    Opaque,
}

/// Backend-issued session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> HandleKind {
        if self.0.starts_with(DATASET_HANDLE_PREFIX) {
            HandleKind::Dataset
        } else if self.0.starts_with(AUDIT_HANDLE_PREFIX) {
            HandleKind::Audit
        } else {
            HandleKind::Opaque
        }
    }

    pub fn is_dataset_only(&self) -> bool {
        self.kind() == HandleKind::Dataset
    }

    /// Reject dataset-only handles before any result call is issued
    pub fn require_completed_audit(&self) -> Result<(), StageError> {
        if self.is_dataset_only() {
            return Err(StageError::SessionMismatch(self.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionHandle {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for SessionHandle {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
