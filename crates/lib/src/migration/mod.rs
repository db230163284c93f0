//! One-time copy of the legacy flat layout into data cells.
//!
//! Legacy storage maps each tag to a map of element id to value. The migration copies
//! every entry into the cell tree, one transaction per tag, and then sets a completion
//! marker. Once the marker is set every later run is a no-op that writes nothing, so
//! every client can safely call it on every connection. Cells that already exist are
//! never overwritten, which also makes a rerun after an interrupted pass harmless.

use serde::Serialize;
use serde_json::Value;
use yrs::{Doc, Map, MapRef, Transact};

use crate::{
    ElementKey, Result,
    cell::{DataCellStore, insert_into_map, map_to_json, out_to_json},
};

mod errors;
pub use errors::MigrationError;

/// Flat key/value storage of the legacy layout.
pub trait LegacyStore {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Visit every top-level entry.
    fn for_each(&self, f: &mut dyn FnMut(&str, &Value));
}

/// [`LegacyStore`] over a root map of a `yrs` document.
pub struct YrsLegacyStore {
    doc: Doc,
    root: MapRef,
}

impl YrsLegacyStore {
    pub fn new(doc: &Doc, root: &str) -> Self {
        Self {
            root: doc.get_or_insert_map(root),
            doc: doc.clone(),
        }
    }

    /// The whole legacy tree.
    pub fn snapshot(&self) -> Value {
        let txn = self.doc.transact();
        map_to_json(&self.root, &txn)
    }
}

impl LegacyStore for YrsLegacyStore {
    fn get(&self, key: &str) -> Option<Value> {
        let txn = self.doc.transact();
        self.root.get(&txn, key).map(|out| out_to_json(&out, &txn))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut txn = self.doc.transact_mut();
        insert_into_map(&self.root, &mut txn, key, &value);
        Ok(())
    }

    fn for_each(&self, f: &mut dyn FnMut(&str, &Value)) {
        // Collected first so the callback may use the document.
        let entries: Vec<(String, Value)> = {
            let txn = self.doc.transact();
            self.root
                .iter(&txn)
                .map(|(key, out)| (key.to_string(), out_to_json(&out, &txn)))
                .collect()
        };
        for (key, value) in &entries {
            f(key, value);
        }
    }
}

/// Outcome of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// The marker was already set; nothing was read or written
    pub skipped: bool,
    /// Legacy tags processed
    pub tags: usize,
    /// Entries copied into new cells
    pub copied: usize,
    /// Entries whose cell already existed
    pub already_present: usize,
    /// Entries or tags that could not be copied
    pub failed: usize,
}

/// Runs the legacy migration against one cell store.
pub struct MigrationCoordinator<'a> {
    store: &'a DataCellStore,
    marker: &'a str,
}

impl<'a> MigrationCoordinator<'a> {
    pub fn new(store: &'a DataCellStore, marker: &'a str) -> Self {
        Self { store, marker }
    }

    /// Whether `legacy` carries the completion marker.
    pub fn is_complete(&self, legacy: &dyn LegacyStore) -> bool {
        legacy
            .get(self.marker)
            .is_some_and(|marker| !matches!(marker, Value::Null | Value::Bool(false)))
    }

    /// Copy every legacy entry into the cell store, unless already done.
    ///
    /// Failures of single entries or tags are logged and counted; only failing to
    /// persist the marker is an error.
    pub fn run_once(&self, legacy: &dyn LegacyStore) -> Result<MigrationReport> {
        if self.is_complete(legacy) {
            tracing::debug!(marker = self.marker, "legacy migration already complete");
            return Ok(MigrationReport {
                skipped: true,
                ..Default::default()
            });
        }

        let mut tags: Vec<(String, Value)> = Vec::new();
        legacy.for_each(&mut |key: &str, value: &Value| {
            if key != self.marker {
                tags.push((key.to_string(), value.clone()));
            }
        });
        tags.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = MigrationReport::default();
        for (tag, value) in tags {
            report.tags += 1;
            let entries = match value {
                Value::Object(entries) => entries,
                other => {
                    let err = MigrationError::MalformedTag {
                        tag,
                        found: kind(&other),
                    };
                    tracing::warn!("{err}");
                    report.failed += 1;
                    continue;
                }
            };

            tracing::info!(%tag, entries = entries.len(), "migrating legacy tag");
            self.store.batch(|batch| {
                for (element_id, value) in &entries {
                    let key = ElementKey::new(tag.as_str(), element_id.as_str());
                    match batch.ensure_cell(&key, value) {
                        Ok(true) => report.copied += 1,
                        Ok(false) => report.already_present += 1,
                        Err(e) => {
                            let err = MigrationError::EntryFailed {
                                tag: tag.clone(),
                                element_id: element_id.clone(),
                                reason: e.to_string(),
                            };
                            tracing::warn!("{err}");
                            report.failed += 1;
                        }
                    }
                }
            });
        }

        legacy
            .set(self.marker, Value::Bool(true))
            .map_err(|e| MigrationError::MarkerNotSet {
                marker: self.marker.to_string(),
                source: Box::new(e),
            })?;
        tracing::info!(
            tags = report.tags,
            copied = report.copied,
            already_present = report.already_present,
            failed = report.failed,
            "legacy migration complete"
        );
        Ok(report)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}
