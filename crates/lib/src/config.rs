//! Engine configuration.
//!
//! [`EngineConfig`] names the reserved locations inside the shared document and the
//! reserved awareness fields. Every field has a default, so an empty JSON object is a
//! valid configuration.
//!
//! ```
//! use elemsync::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "identity_key": "__identity" }"#)?;
//! assert_eq!(config.cells_root, "cells");
//! assert_eq!(config.identity_key.as_deref(), Some("__identity"));
//! # Ok::<(), elemsync::Error>(())
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    CELLS_ROOT, LEGACY_ROOT, MIGRATION_MARKER, RESERVED_AWARENESS_PREFIX, TAG_ROOT_SEPARATOR,
};

/// Errors raised while loading or validating an [`EngineConfig`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for this schema
    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },

    /// A field has a value the engine cannot work with
    #[error("Invalid config field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

impl ConfigError {
    /// Check if this error came from reading the file rather than its contents
    pub fn is_io_error(&self) -> bool {
        matches!(self, ConfigError::Read { .. })
    }

    /// Check if this error is a validation failure
    pub fn is_invalid_field(&self) -> bool {
        matches!(self, ConfigError::InvalidField { .. })
    }
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err)
    }
}

/// Layout and presence settings for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root map holding the `tag -> element id -> value` tree.
    pub cells_root: String,

    /// Root map holding the legacy flat layout.
    pub legacy_root: String,

    /// Key in the legacy root recording that migration completed.
    pub migration_marker: String,

    /// Awareness fields with this prefix are excluded from element data.
    pub reserved_awareness_prefix: String,

    /// Awareness field carrying a client's long-lived identity.
    ///
    /// When unset, awareness contributions are keyed by the transport client id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cells_root: CELLS_ROOT.to_string(),
            legacy_root: LEGACY_ROOT.to_string(),
            migration_marker: MIGRATION_MARKER.to_string(),
            reserved_awareness_prefix: RESERVED_AWARENESS_PREFIX.to_string(),
            identity_key: None,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check that the reserved names are usable.
    ///
    /// The two roots must differ and the legacy root must not look like the root map
    /// of a tag. The identity field must be reserved so it is never mistaken for a
    /// capability tag.
    pub fn validate(&self) -> crate::Result<()> {
        for (field, value) in [
            ("cells_root", &self.cells_root),
            ("legacy_root", &self.legacy_root),
            ("migration_marker", &self.migration_marker),
            ("reserved_awareness_prefix", &self.reserved_awareness_prefix),
        ] {
            if value.is_empty() {
                return Err(ConfigError::InvalidField {
                    field: field.to_string(),
                    reason: "must not be empty".to_string(),
                }
                .into());
            }
        }

        if self.cells_root == self.legacy_root {
            return Err(ConfigError::InvalidField {
                field: "legacy_root".to_string(),
                reason: format!("must differ from cells_root '{}'", self.cells_root),
            }
            .into());
        }
        let tag_prefix = format!("{}{TAG_ROOT_SEPARATOR}", self.cells_root);
        if self.legacy_root.starts_with(&tag_prefix) {
            return Err(ConfigError::InvalidField {
                field: "legacy_root".to_string(),
                reason: format!("must not start with '{tag_prefix}'"),
            }
            .into());
        }

        if let Some(identity_key) = &self.identity_key
            && !self.is_reserved_awareness_key(identity_key)
        {
            return Err(ConfigError::InvalidField {
                field: "identity_key".to_string(),
                reason: format!(
                    "must start with the reserved prefix '{}'",
                    self.reserved_awareness_prefix
                ),
            }
            .into());
        }

        Ok(())
    }

    /// Whether an awareness field is reserved (not element data).
    pub fn is_reserved_awareness_key(&self, key: &str) -> bool {
        key.starts_with(&self.reserved_awareness_prefix)
    }
}
