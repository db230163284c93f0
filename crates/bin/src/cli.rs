//! CLI argument definitions for the elemsync binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect and migrate elemsync documents
#[derive(Parser, Debug)]
#[command(name = "elemsync")]
#[command(about = "elemsync: per-element state in shared documents")]
#[command(version)]
pub struct Cli {
    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the data cells and legacy entries of a document
    Inspect(InspectArgs),
    /// Copy the legacy layout of a document into data cells
    Migrate(MigrateArgs),
}

/// Document and configuration shared by every command
#[derive(clap::Args, Debug)]
pub struct DocumentArgs {
    /// Document stored as a v1 update file
    pub doc: PathBuf,

    /// Engine configuration (JSON)
    #[arg(short, long, env = "ELEMSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Arguments for the inspect command
#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub document: DocumentArgs,
}

/// Arguments for the migrate command
#[derive(clap::Args, Debug)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub document: DocumentArgs,

    /// Where to write the migrated document. Defaults to overwriting the input.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
