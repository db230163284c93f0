//! Error types for data cell operations.

use thiserror::Error;

/// Structured errors for reading and mutating data cells.
#[non_exhaustive]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CellError {
    /// No cell exists for the key
    #[error("Data cell not found: {key}")]
    CellNotFound { key: String },

    /// Tag or element id is empty
    #[error("Invalid cell key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A path segment did not resolve
    #[error("Path '{path}' not found in cell {key}")]
    PathNotFound { key: String, path: String },

    /// A value had a different shape than the edit needs
    #[error("Type mismatch at '{path}' in cell {key}: expected {expected}, found {actual}")]
    TypeMismatch {
        key: String,
        path: String,
        expected: String,
        actual: String,
    },

    /// An array index was out of range
    #[error("Index {index} out of bounds at '{path}' in cell {key} (length {len})")]
    IndexOutOfBounds {
        key: String,
        path: String,
        index: usize,
        len: usize,
    },

    /// The replicated array cannot express this edit
    #[error(
        "Unsupported array edit '{operation}' at '{path}' in cell {key}: only append and splice edits are replicated"
    )]
    UnsupportedArrayEdit {
        key: String,
        path: String,
        operation: String,
    },

    /// A remote update or state vector could not be decoded or applied
    #[error("Invalid update: {reason}")]
    InvalidUpdate { reason: String },
}

impl CellError {
    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CellError::CellNotFound { .. } | CellError::PathNotFound { .. }
        )
    }

    /// Check if this error is an edit the replicated array cannot perform
    pub fn is_unsupported_operation(&self) -> bool {
        matches!(self, CellError::UnsupportedArrayEdit { .. })
    }

    /// Check if this error is related to type mismatches
    pub fn is_type_error(&self) -> bool {
        matches!(self, CellError::TypeMismatch { .. })
    }

    /// Get the operation name if this is an unsupported edit
    pub fn operation(&self) -> Option<&str> {
        match self {
            CellError::UnsupportedArrayEdit { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// Get the path if this is a path-related error
    pub fn path(&self) -> Option<&str> {
        match self {
            CellError::PathNotFound { path, .. }
            | CellError::TypeMismatch { path, .. }
            | CellError::IndexOutOfBounds { path, .. }
            | CellError::UnsupportedArrayEdit { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl From<CellError> for crate::Error {
    fn from(err: CellError) -> Self {
        crate::Error::Cell(err)
    }
}
