//! Path resolution for trackdeck data files.
//!
//! All trackdeck data is stored in `~/.trackdeck/`:
//! - `trackdeck.db` - SQLite store (plus `-wal`/`-shm` side files)
//! - `profiles/` - Legacy flat-file tree (one directory per profile)
//! - `backups/` - Timestamped copies of the flat-file tree
//!
//! Moving or backing up the store means copying the database file together
//! with its write-ahead-log side files.

use std::path::PathBuf;

use crate::error::StoreError;

/// Paths to trackdeck data files and directories.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.trackdeck/`
    pub root: PathBuf,
    /// Database file: `~/.trackdeck/trackdeck.db`
    pub database: PathBuf,
    /// Legacy flat-file tree: `~/.trackdeck/profiles/`
    pub profiles: PathBuf,
    /// Backup directory: `~/.trackdeck/backups/`
    pub backups: PathBuf,
}

impl Paths {
    /// Create paths based on the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, StoreError> {
        let home = std::env::var("HOME")
            .map_err(|_| StoreError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".trackdeck")))
    }

    /// Create paths with a custom root directory (useful for testing).
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            database: root.join("trackdeck.db"),
            profiles: root.join("profiles"),
            backups: root.join("backups"),
            root,
        }
    }

    /// Ensure all directories exist, creating them if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), StoreError> {
        for dir in [&self.root, &self.profiles, &self.backups] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    StoreError::Config(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        Ok(())
    }

    /// Side files that must travel with the database when it is copied.
    #[must_use]
    pub fn database_side_files(&self) -> Vec<PathBuf> {
        let name = self
            .database
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        vec![
            self.database.with_file_name(format!("{name}-wal")),
            self.database.with_file_name(format!("{name}-shm")),
        ]
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| {
            // Fallback to current directory if home cannot be determined
            Self::with_root(PathBuf::from(".trackdeck"))
        })
    }
}
