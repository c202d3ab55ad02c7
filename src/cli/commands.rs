//! Maintenance command implementations.
//!
//! Each command returns its rendered output; `main` prints it. Pretty
//! output goes through `colored`, JSON output serializes a small
//! per-command summary struct.

use std::path::Path;

use chrono::Utc;
use colored::Colorize;
use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::StoreError;
use crate::exchange;
use crate::migration::Migrator;
use crate::model::EntityCounts;
use crate::storage::cache::CacheManager;
use crate::storage::{FlatFileStore, SqliteStore, StoreBackend};

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn ok_line(message: &str) -> String {
    format!("{} {message}", "ok".green().bold())
}

fn render_counts(counts: &EntityCounts) -> String {
    format!(
        "  profiles:          {}\n  queries:           {}\n  cached records:    {}\n  change events:     {}\n  statistics points: {}\n  scope snapshots:   {}\n  metric points:     {}",
        counts.profiles,
        counts.queries,
        counts.cached_records,
        counts.change_events,
        counts.statistics_points,
        counts.scope_snapshots,
        counts.metric_points,
    )
}

/// Run the flat-file to relational migration.
///
/// # Errors
///
/// Returns an error if the migration fails; the store is rolled back to
/// its pre-run state first.
pub fn migrate(paths: &Paths, format: OutputFormat) -> Result<String, StoreError> {
    #[derive(Serialize)]
    struct Output<'a> {
        state: String,
        already_complete: bool,
        backup: Option<&'a Path>,
        counts: EntityCounts,
    }

    let report = Migrator::new(paths.clone()).run()?;

    match format {
        OutputFormat::Json => to_json(&Output {
            state: report.state.to_string(),
            already_complete: report.already_complete,
            backup: report.backup.as_deref(),
            counts: report.counts,
        }),
        OutputFormat::Pretty => {
            let mut out = Vec::new();
            if report.already_complete {
                out.push(ok_line("store already migrated"));
            } else {
                out.push(ok_line("migration committed"));
                if let Some(backup) = &report.backup {
                    out.push(format!("  backup: {}", backup.display()));
                }
            }
            out.push(render_counts(&report.counts));
            Ok(out.join("\n"))
        }
    }
}

/// Export the relational store to a flat-file tree.
///
/// # Errors
///
/// Returns an error if the store cannot be read or the tree written.
pub fn export(paths: &Paths, target: &Path, format: OutputFormat) -> Result<String, StoreError> {
    #[derive(Serialize)]
    struct Output<'a> {
        target: &'a Path,
        counts: EntityCounts,
    }

    let store = SqliteStore::open(paths)?;
    let counts = exchange::export_store(&store, target)?;

    match format {
        OutputFormat::Json => to_json(&Output { target, counts }),
        OutputFormat::Pretty => Ok(ok_line(&format!(
            "exported {} rows to {}",
            counts.total(),
            target.display()
        ))),
    }
}

/// Import one profile from an exported flat-file tree.
///
/// # Errors
///
/// Returns `NotFound` if the tree has no such profile, or any store
/// error from the copy.
pub fn import(
    paths: &Paths,
    tree: &Path,
    profile: &str,
    format: OutputFormat,
) -> Result<String, StoreError> {
    #[derive(Serialize)]
    struct Output<'a> {
        profile: &'a str,
        imported_as: &'a str,
    }

    let store = SqliteStore::open(paths)?;
    let imported_as = exchange::import_profile(tree, profile, &store)?;

    match format {
        OutputFormat::Json => to_json(&Output {
            profile,
            imported_as: &imported_as,
        }),
        OutputFormat::Pretty => {
            if imported_as == profile {
                Ok(ok_line(&format!("imported profile '{profile}'")))
            } else {
                Ok(ok_line(&format!(
                    "imported profile '{profile}' as '{imported_as}'"
                )))
            }
        }
    }
}

/// Delete expired cached records and change events.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the sweep fails.
pub fn sweep(paths: &Paths, format: OutputFormat) -> Result<String, StoreError> {
    #[derive(Serialize)]
    struct Output {
        swept: usize,
    }

    let cache = CacheManager::new(SqliteStore::open(paths)?);
    let swept = cache.sweep(Utc::now())?;

    match format {
        OutputFormat::Json => to_json(&Output { swept }),
        OutputFormat::Pretty => Ok(ok_line(&format!("swept {swept} expired rows"))),
    }
}

/// Show migration state, schema version, and row counts.
///
/// # Errors
///
/// Returns an error if the active backend cannot be read.
pub fn status(paths: &Paths, format: OutputFormat) -> Result<String, StoreError> {
    #[derive(Serialize)]
    struct Output<'a> {
        backend: &'a str,
        migration: String,
        schema_version: Option<i32>,
        counts: EntityCounts,
    }

    let migrator = Migrator::new(paths.clone());
    let state = migrator.state()?;

    let (backend, schema_version, counts) = if migrator.is_complete()? {
        let store = SqliteStore::open(paths)?;
        (
            "relational",
            Some(store.database().schema_version()?),
            store.entity_counts()?,
        )
    } else {
        let flat = FlatFileStore::open(paths);
        ("flat-file", None, flat.entity_counts()?)
    };

    match format {
        OutputFormat::Json => to_json(&Output {
            backend,
            migration: state.to_string(),
            schema_version,
            counts,
        }),
        OutputFormat::Pretty => {
            let mut out = vec![
                format!("backend:   {}", backend.bold()),
                format!("migration: {state}"),
            ];
            if let Some(version) = schema_version {
                out.push(format!("schema:    v{version}"));
            }
            out.push(render_counts(&counts));
            Ok(out.join("\n"))
        }
    }
}
