//! One-way migration from the flat-file tree to the relational store.
//!
//! The migration runs through fixed stages: back up the flat tree,
//! initialize the schema, transform every entity across, validate row
//! counts, then commit. The new store is built at a staging path beside
//! the final one and renamed into place only after validation, so a
//! failure at any stage leaves the flat tree untouched and no partial
//! store behind.
//!
//! Completion is recorded in the store itself under the
//! `migration_complete` application state key; a second run is a no-op.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::Paths;
use crate::error::StoreError;
use crate::exchange;
use crate::model::{app_state, EntityCounts};
use crate::storage::{FlatFileStore, SqliteStore, StoreBackend, SCHEMA_VERSION};

pub mod backup;
pub mod validate;

/// Where a migration run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotStarted,
    BackingUp,
    SchemaInit,
    Transforming,
    Validating,
    Committed,
    RolledBack,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::BackingUp => "backing up",
            Self::SchemaInit => "schema init",
            Self::Transforming => "transforming",
            Self::Validating => "validating",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// Outcome of a migration run.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub state: MigrationState,
    /// Rows now held by the relational store.
    pub counts: EntityCounts,
    /// Backup taken by this run, absent when the run was a no-op.
    pub backup: Option<PathBuf>,
    /// True when a previous run had already committed.
    pub already_complete: bool,
}

/// Orchestrates the flat-file to relational migration.
#[derive(Debug)]
pub struct Migrator {
    paths: Paths,
}

impl Migrator {
    #[must_use]
    pub const fn new(paths: Paths) -> Self {
        Self { paths }
    }

    /// Whether a previous run has committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing store cannot be opened.
    pub fn is_complete(&self) -> Result<bool, StoreError> {
        if !self.paths.database.exists() {
            return Ok(false);
        }
        let store = SqliteStore::open_at(&self.paths.database)?;
        Ok(store.get_state(app_state::MIGRATION_COMPLETE)?.as_deref() == Some("true"))
    }

    /// Observable migration state for status reporting.
    ///
    /// Intermediate stages are never observable from outside a run: a
    /// failed run removes its staging store and reports `RolledBack`
    /// through its error, leaving the system indistinguishable from one
    /// that never started.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing store cannot be opened.
    pub fn state(&self) -> Result<MigrationState, StoreError> {
        if self.is_complete()? {
            Ok(MigrationState::Committed)
        } else {
            Ok(MigrationState::NotStarted)
        }
    }

    /// Run the migration end to end.
    ///
    /// Idempotent: once committed, further runs report completion without
    /// touching anything. Refuses to run over an unmigrated relational
    /// store that already holds rows; migration only ever replaces an
    /// empty store file.
    ///
    /// # Errors
    ///
    /// Returns `MigrationFailed` naming the stage that failed, or when
    /// the target store already holds data that a commit would discard.
    /// The staging store is removed before returning; the flat-file tree
    /// and its backup are left intact.
    pub fn run(&self) -> Result<MigrationReport, StoreError> {
        if self.is_complete()? {
            info!("migration already committed, nothing to do");
            let store = SqliteStore::open_at(&self.paths.database)?;
            return Ok(MigrationReport {
                state: MigrationState::Committed,
                counts: store.entity_counts()?,
                backup: None,
                already_complete: true,
            });
        }

        // A store at the final path without the completion flag was
        // populated through the public surface before migration ran;
        // committing over it would silently discard those rows.
        if self.paths.database.exists() {
            let existing = SqliteStore::open_at(&self.paths.database)?;
            if existing.entity_counts()?.total() > 0 {
                return Err(StoreError::MigrationFailed(format!(
                    "store {} already holds data but is not marked migrated; \
                     export it or move it aside before migrating",
                    self.paths.database.display()
                )));
            }
        }

        self.paths.ensure_dirs()?;
        let source = FlatFileStore::open(&self.paths);
        let staging = self.staging_path();

        // A crash in an earlier run may have left a stale staging store
        Self::remove_store_files(&staging)?;

        match self.run_stages(&source, &staging) {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e, "migration failed, removing staging store");
                if let Err(rm) = Self::remove_store_files(&staging) {
                    warn!(error = %rm, "could not remove staging store");
                }
                Err(match e {
                    StoreError::MigrationFailed(_) => e,
                    other => StoreError::MigrationFailed(format!("commit stage: {other}")),
                })
            }
        }
    }

    fn run_stages(
        &self,
        source: &FlatFileStore,
        staging: &Path,
    ) -> Result<MigrationReport, StoreError> {
        debug!(stage = %MigrationState::BackingUp, "starting stage");
        let backup = backup::create(source.root(), &self.paths.backups)
            .map_err(|e| stage_error(MigrationState::BackingUp, &e))?;

        debug!(stage = %MigrationState::SchemaInit, "starting stage");
        let staging_store =
            SqliteStore::open_at(staging).map_err(|e| stage_error(MigrationState::SchemaInit, &e))?;

        debug!(stage = %MigrationState::Transforming, "starting stage");
        let counts = exchange::copy_all(source, &staging_store)
            .map_err(|e| stage_error(MigrationState::Transforming, &e))?;

        debug!(stage = %MigrationState::Validating, "starting stage");
        let expected = source
            .entity_counts()
            .map_err(|e| stage_error(MigrationState::Validating, &e))?;
        validate::check(&expected, &counts)?;

        // Commit: stamp the store, flush the WAL, rename into place
        staging_store.set_state(app_state::MIGRATION_COMPLETE, "true")?;
        staging_store.set_state(app_state::SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
        staging_store.database().checkpoint()?;
        // Side files of an empty pre-migration store must not pair with
        // the renamed file
        for side in self.paths.database_side_files() {
            if side.exists() {
                std::fs::remove_file(side)?;
            }
        }
        std::fs::rename(staging, &self.paths.database)?;

        info!(rows = counts.total(), backup = %backup.display(), "migration committed");
        Ok(MigrationReport {
            state: MigrationState::Committed,
            counts,
            backup: Some(backup),
            already_complete: false,
        })
    }

    /// The relational store is built beside its final path and renamed
    /// into place on commit.
    fn staging_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.migrating", self.paths.database.display()))
    }

    /// Remove a store file plus its WAL side files.
    fn remove_store_files(store: &Path) -> Result<(), StoreError> {
        let wal = PathBuf::from(format!("{}-wal", store.display()));
        let shm = PathBuf::from(format!("{}-shm", store.display()));

        for path in [store, wal.as_path(), shm.as_path()] {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

fn stage_error(state: MigrationState, e: &StoreError) -> StoreError {
    StoreError::MigrationFailed(format!("{state} stage: {e}"))
}
