//! Error types for the editor

use thiserror::Error;
use trellis_common::{CommonError, ValueKind};

use crate::NodeId;

pub type EditorResult<T> = Result<T, EditorError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditorError {
    /// A property value or node was rejected by its schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// A structural mutation would make a node its own ancestor
    #[error("Would create cycle: {node} cannot be placed under {parent}")]
    Cycle { node: NodeId, parent: NodeId },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Another command (or an open transaction) owns the document
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Unsupported schema version {found} (supported up to {supported})")]
    Version { found: u32, supported: u32 },

    /// A graph invariant failed. Fatal: the document refuses further mutation.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Raised by a command checkpoint after a cancel request
    #[error("Cancelled")]
    Cancelled,

    /// Storage or encoding failure (never raised inside a transaction)
    #[error("{0}")]
    Common(String),
}

impl EditorError {
    pub(crate) fn kind_mismatch(
        node: &NodeId,
        property: &str,
        expected: ValueKind,
        found: ValueKind,
    ) -> Self {
        EditorError::Validation(format!(
            "{}.{} expects {}, got {}",
            node, property, expected, found
        ))
    }

    pub(crate) fn node_not_found(id: &NodeId) -> Self {
        EditorError::NotFound(format!("node {}", id))
    }

    /// Whether the document is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EditorError::Consistency(_))
    }
}

impl From<CommonError> for EditorError {
    fn from(e: CommonError) -> Self {
        EditorError::Common(e.to_string())
    }
}

impl From<serde_json::Error> for EditorError {
    fn from(e: serde_json::Error) -> Self {
        EditorError::Common(CommonError::Json(e).to_string())
    }
}

impl From<std::io::Error> for EditorError {
    fn from(e: std::io::Error) -> Self {
        EditorError::Common(CommonError::Io(e).to_string())
    }
}
