//! Documents stored on disk as a single v1 update.

use std::{error::Error, path::Path};

use elemsync::{EngineConfig, cell::DataCellStore, migration::YrsLegacyStore, y_crdt::Doc};

use crate::cli::DocumentArgs;

/// A loaded document with its cell tree and legacy layout.
pub struct Document {
    pub config: EngineConfig,
    pub cells: DataCellStore,
    pub legacy: YrsLegacyStore,
}

impl Document {
    /// Load the document and configuration named by `args`.
    pub fn open(args: &DocumentArgs) -> Result<Self, Box<dyn Error>> {
        let config = match &args.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        Self::load(&args.doc, config)
    }

    pub fn load(path: &Path, config: EngineConfig) -> Result<Self, Box<dyn Error>> {
        let update = std::fs::read(path)
            .map_err(|e| format!("Failed to read document '{}': {e}", path.display()))?;

        let doc = Doc::new();
        let legacy = YrsLegacyStore::new(&doc, &config.legacy_root);
        let cells = DataCellStore::new(doc, &config.cells_root);
        cells.apply_remote_update(&update)?;
        tracing::info!(path = %path.display(), bytes = update.len(), "loaded document");

        Ok(Self {
            config,
            cells,
            legacy,
        })
    }

    /// Write the whole document to `path` as one v1 update.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        let update = self.cells.encode_state_as_update(None)?;
        std::fs::write(path, &update)
            .map_err(|e| format!("Failed to write document '{}': {e}", path.display()))?;
        tracing::info!(path = %path.display(), bytes = update.len(), "saved document");
        Ok(())
    }
}
