//! Constants used throughout the elemsync library.
//!
//! This module provides central definitions for reserved root names and keys
//! inside the shared document, and for reserved awareness fields.

/// Default name of the cells root.
///
/// The root map itself is the index of tags in use. The cells of one tag live in
/// their own root map named `{root}{TAG_ROOT_SEPARATOR}{tag}`, so peers creating the
/// first cell of a tag concurrently write into the same map.
pub const CELLS_ROOT: &str = "cells";

/// Joins the cells root name and a tag into the name of that tag's root map.
pub const TAG_ROOT_SEPARATOR: &str = "/";

/// Default root map holding the legacy flat `tag -> map(element id -> value)` layout.
pub const LEGACY_ROOT: &str = "play";

/// Reserved key inside the legacy root marking that migration has completed.
pub const MIGRATION_MARKER: &str = "__cells_migrated";

/// Awareness fields starting with this prefix are not element data.
///
/// They are skipped by the element fingerprint and never treated as a tag.
pub const RESERVED_AWARENESS_PREFIX: &str = "__";

/// Field of an identity object carrying the stable id.
pub const STABLE_ID_FIELD: &str = "stableId";

/// Number of hex digits kept from the content hash of a derived element id.
pub const DERIVED_ID_HEX_LEN: usize = 16;
