//! Error types for element bindings.

use thiserror::Error;

/// Errors raised by binding handles and the binding registry.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BindingError {
    /// No binding exists for the key
    #[error("Element not bound: {key}")]
    NotBound { key: String },

    /// The engine owning the binding has been dropped
    #[error("Sync engine has been dropped")]
    EngineDropped,

    /// A mutation listener could not take the event
    #[error("Mutation listener unavailable: {reason}")]
    ListenerUnavailable { reason: String },
}

impl BindingError {
    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, BindingError::NotBound { .. })
    }

    /// Check if this error means the binding outlived its engine
    pub fn is_engine_dropped(&self) -> bool {
        matches!(self, BindingError::EngineDropped)
    }
}

impl From<BindingError> for crate::Error {
    fn from(err: BindingError) -> Self {
        crate::Error::Binding(err)
    }
}
