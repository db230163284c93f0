//! Identifier types for capabilities and elements.
//!
//! A [`CapabilityTag`] names a class of behavior, an [`ElementId`] names one element
//! within a tag, and an [`ElementKey`] is the pair addressing a single data cell.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{CapabilityError, ElementInfo};
use crate::constants::DERIVED_ID_HEX_LEN;

/// Opaque name of a capability, e.g. `"can-toggle"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityTag(String);

impl CapabilityTag {
    /// Creates a tag from any string-like input.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the tag is empty.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for CapabilityTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CapabilityTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for CapabilityTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an element, unique within its tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Creates an id from any string-like input without validation.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Derives the id for `element` under `tag`.
    ///
    /// An explicit id wins. Otherwise the id is a prefix of the SHA-256 of
    /// `tag:content`, which stays stable across reloads of identical markup.
    pub fn derive(tag: &CapabilityTag, element: &ElementInfo) -> Result<Self, CapabilityError> {
        if let Some(explicit) = &element.id {
            if explicit.trim().is_empty() {
                return Err(CapabilityError::InvalidElementId {
                    tag: tag.to_string(),
                    reason: "explicit id is blank".to_string(),
                });
            }
            return Ok(Self(explicit.clone()));
        }

        if element.content.trim().is_empty() {
            return Err(CapabilityError::MissingElementId {
                tag: tag.to_string(),
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(tag.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(element.content.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        Ok(Self(hash[..DERIVED_ID_HEX_LEN].to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ElementId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `(tag, element id)` pair addressing one data cell and one binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementKey {
    pub tag: CapabilityTag,
    pub element_id: ElementId,
}

impl ElementKey {
    pub fn new(tag: impl Into<CapabilityTag>, element_id: impl Into<ElementId>) -> Self {
        Self {
            tag: tag.into(),
            element_id: element_id.into(),
        }
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tag, self.element_id)
    }
}
