//! Error types for capability registration and element identification.

use thiserror::Error;

/// Errors raised while building capability descriptors or identifying elements.
///
/// Element-level variants are registration errors: they abort the binding of one
/// element and leave every other element untouched.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A descriptor was built without a required field
    #[error("Capability '{tag}' is incomplete: missing {missing}")]
    Incomplete { tag: String, missing: &'static str },

    /// A descriptor was built with an empty tag
    #[error("Capability tag must not be empty")]
    EmptyTag,

    /// No descriptor is registered under the tag
    #[error("Capability not registered: {tag}")]
    NotRegistered { tag: String },

    /// The element carries neither an explicit id nor content to derive one from
    #[error("Element for '{tag}' has no id and no content to derive one from")]
    MissingElementId { tag: String },

    /// The element's explicit id is unusable
    #[error("Invalid element id for '{tag}': {reason}")]
    InvalidElementId { tag: String, reason: String },

    /// The capability's validity predicate rejected the element
    #[error("Element '{element_id}' is not valid for capability '{tag}'")]
    InvalidElement { tag: String, element_id: String },
}

impl CapabilityError {
    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, CapabilityError::NotRegistered { .. })
    }

    /// Check if this error should abort only the binding of one element
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            CapabilityError::MissingElementId { .. }
                | CapabilityError::InvalidElementId { .. }
                | CapabilityError::InvalidElement { .. }
        )
    }

    /// Check if this error comes from an incomplete descriptor
    pub fn is_descriptor_error(&self) -> bool {
        matches!(
            self,
            CapabilityError::Incomplete { .. } | CapabilityError::EmptyTag
        )
    }

    /// Get the tag associated with this error, if any
    pub fn tag(&self) -> Option<&str> {
        match self {
            CapabilityError::Incomplete { tag, .. }
            | CapabilityError::NotRegistered { tag }
            | CapabilityError::MissingElementId { tag }
            | CapabilityError::InvalidElementId { tag, .. }
            | CapabilityError::InvalidElement { tag, .. } => Some(tag),
            CapabilityError::EmptyTag => None,
        }
    }
}

impl From<CapabilityError> for crate::Error {
    fn from(err: CapabilityError) -> Self {
        crate::Error::Capability(err)
    }
}
