//! Pre-migration backups of the flat-file tree.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::error::StoreError;

/// Copy the flat-file tree into a timestamped directory under `backups`.
///
/// Returns the backup directory. A missing source tree produces an empty
/// backup rather than an error, so a first run on a fresh install still
/// succeeds.
///
/// # Errors
///
/// Returns an error if any file cannot be copied.
pub fn create(source: &Path, backups: &Path) -> Result<PathBuf, StoreError> {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let mut target = backups.join(format!("flatfiles-{stamp}"));

    // Two runs within the same second must not share a directory
    let mut n = 2;
    while target.exists() {
        target = backups.join(format!("flatfiles-{stamp}-{n}"));
        n += 1;
    }

    copy_tree(source, &target)?;
    info!(backup = %target.display(), "backed up flat-file tree");
    Ok(target)
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(to)?;
    if !from.exists() {
        return Ok(());
    }

    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backup_copies_nested_tree() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("profiles");
        std::fs::create_dir_all(source.join("alpha/queries/1")).unwrap();
        std::fs::write(source.join("alpha/profile.json"), "{}").unwrap();
        std::fs::write(source.join("alpha/queries/1/query.json"), "{}").unwrap();

        let backup = create(&source, &dir.path().join("backups")).unwrap();
        assert!(backup.join("alpha/profile.json").exists());
        assert!(backup.join("alpha/queries/1/query.json").exists());
    }

    #[test]
    fn test_backups_never_collide() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("profiles");
        std::fs::create_dir_all(&source).unwrap();

        let first = create(&source, &dir.path().join("backups")).unwrap();
        let second = create(&source, &dir.path().join("backups")).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_missing_source_yields_empty_backup() {
        let dir = TempDir::new().unwrap();
        let backup = create(&dir.path().join("nope"), &dir.path().join("backups")).unwrap();
        assert!(backup.is_dir());
        assert_eq!(std::fs::read_dir(&backup).unwrap().count(), 0);
    }
}
