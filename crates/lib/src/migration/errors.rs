//! Error types for the legacy storage migration.

use thiserror::Error;

/// Errors raised while copying legacy storage into data cells.
///
/// Only [`MigrationError::MarkerNotSet`] aborts a run; the other variants are logged
/// and counted per entry or tag.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A legacy tag did not hold a map of elements
    #[error("Legacy tag '{tag}' holds {found}, expected a map of elements")]
    MalformedTag { tag: String, found: &'static str },

    /// One legacy entry could not be copied
    #[error("Failed to migrate {tag}/{element_id}: {reason}")]
    EntryFailed {
        tag: String,
        element_id: String,
        reason: String,
    },

    /// The completion marker could not be persisted
    #[error("Failed to set migration marker '{marker}': {source}")]
    MarkerNotSet {
        marker: String,
        #[source]
        source: Box<crate::Error>,
    },
}

impl MigrationError {
    /// Check if this error only affects part of a run
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            MigrationError::MalformedTag { .. } | MigrationError::EntryFailed { .. }
        )
    }
}

impl From<MigrationError> for crate::Error {
    fn from(err: MigrationError) -> Self {
        crate::Error::Migration(err)
    }
}
