//! Moving data between store backends.
//!
//! Export, import, and the migration transform are all the same
//! operation: walk one backend's tree and replay it into another through
//! the [`StoreBackend`] contract. Expired cache rows are carried along so
//! a copy is a faithful snapshot, not a swept one.

use std::path::Path;

use tracing::info;

use crate::error::StoreError;
use crate::model::{app_state, EntityCounts, EventFilter, MetricFilter, RecordFilter};
use crate::storage::{FlatFileStore, StoreBackend, SCHEMA_VERSION};

/// Copy one profile and its whole subtree, saving it under `dest_name`.
///
/// # Errors
///
/// Returns `NotFound` if the source profile does not exist, or any error
/// from reading the source or writing the destination.
pub fn copy_profile(
    source: &impl StoreBackend,
    dest: &impl StoreBackend,
    name: &str,
    dest_name: &str,
) -> Result<(), StoreError> {
    let mut profile = source
        .get_profile(name)?
        .ok_or_else(|| StoreError::NotFound(format!("Profile '{name}'")))?;
    profile.name = dest_name.to_string();
    dest.save_profile(&profile)?;

    for query in source.list_queries(name)? {
        dest.save_query(dest_name, &query)?;

        let records = source.cached_records(
            name,
            query.local_id,
            &RecordFilter::default().including_expired(),
        )?;
        dest.save_cached_records(dest_name, query.local_id, &records)?;

        let events = source.change_events(name, query.local_id, &EventFilter::default())?;
        dest.save_change_events(dest_name, query.local_id, &events)?;

        let stats = source.statistics_points(name, query.local_id)?;
        dest.save_statistics_points(dest_name, query.local_id, &stats)?;

        let metrics = source.metric_points(name, query.local_id, &MetricFilter::default())?;
        dest.save_metric_points(dest_name, query.local_id, &metrics)?;

        if let Some(snapshot) = source.scope_snapshot(name, query.local_id)? {
            dest.save_scope_snapshot(dest_name, query.local_id, &snapshot)?;
        }
    }

    Ok(())
}

/// Copy every profile plus the portable application state keys.
///
/// Returns the destination's entity counts after the copy.
///
/// # Errors
///
/// Returns any error from reading the source or writing the destination.
pub fn copy_all(
    source: &impl StoreBackend,
    dest: &impl StoreBackend,
) -> Result<EntityCounts, StoreError> {
    for profile in source.list_profiles()? {
        copy_profile(source, dest, &profile.name, &profile.name)?;
    }

    for key in app_state::PORTABLE {
        if let Some(value) = source.get_state(key)? {
            dest.set_state(key, &value)?;
        }
    }

    dest.entity_counts()
}

/// Export an entire store to a flat-file tree at `target`.
///
/// # Errors
///
/// Returns any error from reading the source or writing the tree.
pub fn export_store(
    source: &impl StoreBackend,
    target: &Path,
) -> Result<EntityCounts, StoreError> {
    let dest = FlatFileStore::with_root(target.to_path_buf());
    let counts = copy_all(source, &dest)?;
    dest.set_state(app_state::SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;

    info!(dir = %target.display(), rows = counts.total(), "exported store");
    Ok(counts)
}

/// Import a single profile from a flat-file tree rooted at `tree`.
///
/// Never overwrites: on a name conflict the profile is saved under a
/// fresh `(imported)` name. Returns the name it was saved under.
///
/// # Errors
///
/// Returns `NotFound` if the tree has no such profile, or any error from
/// reading the tree or writing the destination.
pub fn import_profile(
    tree: &Path,
    name: &str,
    dest: &impl StoreBackend,
) -> Result<String, StoreError> {
    let source = FlatFileStore::with_root(tree.to_path_buf());
    if source.get_profile(name)?.is_none() {
        return Err(StoreError::NotFound(format!(
            "Profile '{name}' in {}",
            tree.display()
        )));
    }

    let dest_name = fresh_name(dest, name)?;
    copy_profile(&source, dest, name, &dest_name)?;

    info!(profile = name, imported_as = %dest_name, "imported profile");
    Ok(dest_name)
}

/// First free variant of `name` in the destination.
fn fresh_name(dest: &impl StoreBackend, name: &str) -> Result<String, StoreError> {
    if dest.get_profile(name)?.is_none() {
        return Ok(name.to_string());
    }

    let renamed = format!("{name} (imported)");
    if dest.get_profile(&renamed)?.is_none() {
        return Ok(renamed);
    }

    for n in 2.. {
        let candidate = format!("{name} (imported {n})");
        if dest.get_profile(&candidate)?.is_none() {
            return Ok(candidate);
        }
    }
    unreachable!("some numbered variant is always free")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use crate::model::{CachedRecord, Profile, Query, ScopeSnapshot, StatisticsPoint};
    use crate::storage::SqliteStore;

    fn seeded_sqlite(dir: &TempDir) -> SqliteStore {
        let store = SqliteStore::open_at(&dir.path().join("source.db")).unwrap();
        let now = Utc::now();

        store.save_profile(&Profile::new("Team Alpha")).unwrap();
        store
            .save_query("Team Alpha", &Query::new(1, "Open bugs", "status = open"))
            .unwrap();
        store
            .save_cached_records(
                "Team Alpha",
                1,
                &[CachedRecord {
                    key: "PROJ-1".to_string(),
                    status: "Open".to_string(),
                    assignee: Some("casey".to_string()),
                    record_type: "Bug".to_string(),
                    created_at: now,
                    updated_at: now,
                    resolved_at: None,
                    fetched_at: now,
                    expires_at: now - Duration::hours(1), // already expired
                    payload: serde_json::json!({"summary": "crash"}),
                }],
            )
            .unwrap();
        store
            .save_statistics_points(
                "Team Alpha",
                1,
                &[StatisticsPoint {
                    week: "2026-W30".to_string(),
                    created_count: 4,
                    resolved_count: 2,
                    open_count: 10,
                    velocity: 2.0,
                    net_change: 2,
                }],
            )
            .unwrap();
        store
            .save_scope_snapshot(
                "Team Alpha",
                1,
                &ScopeSnapshot {
                    remaining: 10.0,
                    baseline: 14.0,
                    forecast_weeks: Some(5.0),
                    detail: serde_json::Value::Null,
                    updated_at: now,
                },
            )
            .unwrap();
        store.set_state(app_state::ACTIVE_PROFILE, "Team Alpha").unwrap();

        store
    }

    #[test]
    fn test_export_then_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = seeded_sqlite(&dir);

        let tree = dir.path().join("export");
        let exported = export_store(&source, &tree).unwrap();
        assert_eq!(exported, source.entity_counts().unwrap());

        // Expired rows survive the copy.
        let flat = FlatFileStore::with_root(tree.clone());
        let records = flat
            .cached_records("Team Alpha", 1, &RecordFilter::default().including_expired())
            .unwrap();
        assert_eq!(records.len(), 1);

        let dest = SqliteStore::open_at(&dir.path().join("dest.db")).unwrap();
        let name = import_profile(&tree, "Team Alpha", &dest).unwrap();
        assert_eq!(name, "Team Alpha");
        assert_eq!(dest.entity_counts().unwrap().cached_records, 1);
    }

    #[test]
    fn test_import_conflict_gets_fresh_name() {
        let dir = TempDir::new().unwrap();
        let source = seeded_sqlite(&dir);

        let tree = dir.path().join("export");
        export_store(&source, &tree).unwrap();

        // Importing into the source itself collides on the name.
        let first = import_profile(&tree, "Team Alpha", &source).unwrap();
        assert_eq!(first, "Team Alpha (imported)");
        let second = import_profile(&tree, "Team Alpha", &source).unwrap();
        assert_eq!(second, "Team Alpha (imported 2)");

        assert_eq!(source.entity_counts().unwrap().profiles, 3);
    }

    #[test]
    fn test_import_missing_profile() {
        let dir = TempDir::new().unwrap();
        let dest = SqliteStore::open_at(&dir.path().join("dest.db")).unwrap();

        let result = import_profile(dir.path(), "Nobody", &dest);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
