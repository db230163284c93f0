//! Migrate command - copies the legacy layout of a document into data cells.

use elemsync::migration::{MigrationCoordinator, MigrationReport};

use crate::{cli::MigrateArgs, document::Document, output::OutputFormat};

/// Run the migration on a loaded document.
pub fn migrate(document: &Document) -> elemsync::Result<MigrationReport> {
    MigrationCoordinator::new(&document.cells, &document.config.migration_marker)
        .run_once(&document.legacy)
}

/// Run the migrate command
pub fn run(args: &MigrateArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let document = Document::open(&args.document)?;
    let report = migrate(&document)?;

    // An already migrated document is left as it is on disk.
    let output = args.output.as_ref().unwrap_or(&args.document.doc);
    if !report.skipped || args.output.is_some() {
        document.save(output)?;
    }

    match format {
        OutputFormat::Human => {
            if report.skipped {
                println!("Already migrated, nothing to do");
            } else {
                println!("Tags:            {}", report.tags);
                println!("Copied:          {}", report.copied);
                println!("Already present: {}", report.already_present);
                println!("Failed:          {}", report.failed);
                println!("Written to:      {}", output.display());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    Ok(())
}
