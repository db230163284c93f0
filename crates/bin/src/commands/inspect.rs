//! Inspect command - shows the data cells and legacy entries of a document.

use elemsync::migration::MigrationCoordinator;

use crate::{
    cli::InspectArgs,
    document::Document,
    output::{OutputFormat, print_table, tree_rows},
};

/// Run the inspect command
pub fn run(args: &InspectArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let document = Document::open(&args.document)?;
    let cells = document.cells.snapshot_all();
    let legacy = document.legacy.snapshot();
    let migrated = MigrationCoordinator::new(&document.cells, &document.config.migration_marker)
        .is_complete(&document.legacy);

    match format {
        OutputFormat::Human => {
            println!("Cells root:  {}", document.config.cells_root);
            println!("Cells:       {}", document.cells.keys().len());
            println!("Legacy root: {}", document.config.legacy_root);
            println!("Migrated:    {}", if migrated { "yes" } else { "no" });

            let cell_rows = tree_rows(&cells);
            if !cell_rows.is_empty() {
                println!();
                print_table(&["TAG", "ELEMENT", "DATA"], &cell_rows);
            }
            let legacy_rows: Vec<_> = tree_rows(&legacy)
                .into_iter()
                .filter(|row| row[0] != document.config.migration_marker)
                .collect();
            if !legacy_rows.is_empty() {
                println!();
                println!("Legacy entries:");
                print_table(&["TAG", "ELEMENT", "DATA"], &legacy_rows);
            }
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "cells_root": document.config.cells_root,
                "legacy_root": document.config.legacy_root,
                "migrated": migrated,
                "cells": cells,
                "legacy": legacy,
            });
            println!("{}", serde_json::to_string(&value)?);
        }
    }

    Ok(())
}
