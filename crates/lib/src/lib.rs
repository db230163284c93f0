//!
//! elemsync: live, conflict-free shared state for individually addressed elements.
//! This library binds elements of a shared document to replicated data cells and to
//! per-client presence, on top of the `yrs` CRDT.
//!
//! ## Core Concepts
//!
//! * **Capabilities (`capability::Capability`)**: Host-supplied descriptors naming a class of collaborative behavior by tag: default data, a render callback, and optional presence and lifecycle hooks.
//! * **Data cells (`cell::DataCellStore`)**: One replicated value per `(tag, element id)`, stored under a root map per tag so peers never conflict over a tag's container. Reads are detached JSON snapshots; writes are single transactions.
//! * **Bindings (`binding::BindingHandle`)**: The live view application code works with: current data, local-only data, other clients' awareness, and the write entry points.
//! * **Observer bridge**: Coalesces change notifications per cell into one refresh, applied without echoing back out as a local write.
//! * **Awareness (`awareness`)**: Aggregates ephemeral per-client presence into per-element views, with a fingerprint to detect changes that matter.
//! * **Migration (`migration::MigrationCoordinator`)**: Copies the legacy flat layout into data cells exactly once across all clients.
//! * **Engine (`SyncEngine`)**: Owns all of the above for one document.

pub mod awareness;
pub mod binding;
pub mod capability;
pub mod cell;
pub mod config;
pub mod constants;
pub mod engine;
pub mod migration;
mod observer;

pub use binding::BindingHandle;
pub use capability::{
    Capability, CapabilityBuilder, CapabilityError, CapabilityRegistry, CapabilityTag,
    ElementId, ElementInfo, ElementKey,
};
pub use config::EngineConfig;
pub use engine::{SyncEngine, WeakSyncEngine};

/// Y-CRDT types re-exported so hosts can create and exchange documents without
/// depending on `yrs` themselves.
pub mod y_crdt {
    pub use yrs::*;
}

/// Result type used throughout the elemsync library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the elemsync library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structured errors from capability descriptors and element identification
    #[error(transparent)]
    Capability(capability::CapabilityError),

    /// Structured errors from the data cell store
    #[error(transparent)]
    Cell(cell::CellError),

    /// Structured errors from element bindings
    #[error(transparent)]
    Binding(binding::BindingError),

    /// Structured errors from the legacy migration
    #[error(transparent)]
    Migration(migration::MigrationError),

    /// Structured errors from configuration loading
    #[error(transparent)]
    Config(config::ConfigError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Capability(_) => "capability",
            Error::Cell(_) => "cell",
            Error::Binding(_) => "binding",
            Error::Migration(_) => "migration",
            Error::Config(_) => "config",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Capability(capability_err) => capability_err.is_not_found(),
            Error::Cell(cell_err) => cell_err.is_not_found(),
            Error::Binding(binding_err) => binding_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is an edit the replicated data cannot express.
    pub fn is_unsupported_operation(&self) -> bool {
        match self {
            Error::Cell(cell_err) => cell_err.is_unsupported_operation(),
            _ => false,
        }
    }

    /// Check if this error aborts the binding of a single element only.
    pub fn is_registration_error(&self) -> bool {
        match self {
            Error::Capability(capability_err) => capability_err.is_registration_error(),
            _ => false,
        }
    }

    /// Check if this error is type-related.
    pub fn is_type_error(&self) -> bool {
        match self {
            Error::Cell(cell_err) => cell_err.is_type_error(),
            _ => false,
        }
    }
}
