use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "trackdeck")]
#[command(about = "Store maintenance for trackdeck issue dashboards")]
#[command(long_about = "trackdeck - store maintenance

Manages the on-disk store behind trackdeck dashboards: one-way migration
from the legacy flat-file tree into the relational store, export/import
of profile data, cache sweeping, and status reporting.

QUICK START:
  trackdeck status            Show store state and row counts
  trackdeck migrate           Migrate the legacy flat-file tree
  trackdeck export ./dump     Export the store to a flat-file tree
  trackdeck sweep             Drop expired cached data

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    #[arg(short, long, value_enum, default_value = "pretty", global = true)]
    pub output: OutputFormat,

    /// Data directory holding the store (defaults to ~/.trackdeck)
    #[arg(long, env = "TRACKDECK_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Migrate the legacy flat-file tree into the relational store
    ///
    /// Backs up the flat tree, builds the relational store beside its
    /// final path, validates row counts, and commits. Safe to re-run:
    /// once committed this is a no-op.
    Migrate,

    /// Export the relational store to a flat-file tree
    Export {
        /// Directory to write the tree into
        target: PathBuf,
    },

    /// Import one profile from an exported flat-file tree
    ///
    /// Existing data is never overwritten; a conflicting profile name is
    /// imported under a fresh "(imported)" name.
    Import {
        /// Root of the exported tree
        tree: PathBuf,
        /// Name of the profile to import
        profile: String,
    },

    /// Delete expired cached records and change events
    Sweep,

    /// Show migration state, schema version, and row counts
    Status,
}
