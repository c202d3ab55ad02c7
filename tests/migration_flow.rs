//! End-to-end migration and exchange flows against a realistic
//! multi-profile data set.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use trackdeck::config::Paths;
use trackdeck::exchange;
use trackdeck::migration::{MigrationState, Migrator};
use trackdeck::model::{app_state, CachedRecord, Profile, Query, RecordFilter, StatisticsPoint};
use trackdeck::storage::{FlatFileStore, SqliteStore, StoreBackend};

fn record(key: &str) -> CachedRecord {
    let now = Utc::now();
    CachedRecord {
        key: key.to_string(),
        status: "Open".to_string(),
        assignee: Some("casey".to_string()),
        record_type: "Bug".to_string(),
        created_at: now,
        updated_at: now,
        resolved_at: None,
        fetched_at: now,
        expires_at: now + Duration::hours(24),
        payload: serde_json::json!({"summary": "placeholder"}),
    }
}

/// Three profiles: one empty, one with a query holding 50 cached
/// records, one with two queries holding 12 statistics points each.
fn seed_fixture(paths: &Paths) -> FlatFileStore {
    let flat = FlatFileStore::open(paths);

    flat.save_profile(&Profile::new("Platform")).unwrap();

    flat.save_profile(&Profile::new("Team Alpha")).unwrap();
    flat.save_query("Team Alpha", &Query::new(1, "Open bugs", "status = open"))
        .unwrap();
    let records: Vec<CachedRecord> = (1..=50).map(|n| record(&format!("ALPHA-{n}"))).collect();
    flat.save_cached_records("Team Alpha", 1, &records).unwrap();

    flat.save_profile(&Profile::new("Team Beta")).unwrap();
    for local_id in [1, 2] {
        flat.save_query(
            "Team Beta",
            &Query::new(local_id, format!("Board {local_id}"), "status = open"),
        )
        .unwrap();
        let points: Vec<StatisticsPoint> = (1_u32..=12)
            .map(|w| StatisticsPoint {
                week: format!("2026-W{w:02}"),
                created_count: w,
                resolved_count: w / 2,
                open_count: 10,
                velocity: f64::from(w) / 2.0,
                net_change: i64::from(w / 2),
            })
            .collect();
        flat.save_statistics_points("Team Beta", local_id, &points)
            .unwrap();
    }

    flat.set_state(app_state::ACTIVE_PROFILE, "Team Alpha")
        .unwrap();
    flat
}

#[test]
fn test_fixture_migrates_every_row() {
    let dir = TempDir::new().unwrap();
    let paths = Paths::with_root(dir.path().join("trackdeck"));
    seed_fixture(&paths);

    let report = Migrator::new(paths.clone()).run().unwrap();

    assert_eq!(report.state, MigrationState::Committed);
    assert_eq!(report.counts.profiles, 3);
    assert_eq!(report.counts.queries, 3);
    assert_eq!(report.counts.cached_records, 50);
    assert_eq!(report.counts.statistics_points, 24);

    let store = SqliteStore::open_at(&paths.database).unwrap();
    assert_eq!(
        store
            .get_state(app_state::MIGRATION_COMPLETE)
            .unwrap()
            .as_deref(),
        Some("true")
    );
    assert_eq!(
        store
            .get_state(app_state::ACTIVE_PROFILE)
            .unwrap()
            .as_deref(),
        Some("Team Alpha")
    );

    let alpha = store
        .cached_records("Team Alpha", 1, &RecordFilter::default())
        .unwrap();
    assert_eq!(alpha.len(), 50);
    assert_eq!(store.statistics_points("Team Beta", 2).unwrap().len(), 12);
}

#[test]
fn test_second_run_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let paths = Paths::with_root(dir.path().join("trackdeck"));
    seed_fixture(&paths);

    let migrator = Migrator::new(paths);
    let first = migrator.run().unwrap();
    let second = migrator.run().unwrap();

    assert!(second.already_complete);
    assert_eq!(first.counts, second.counts);
}

#[test]
fn test_failure_leaves_flat_tree_authoritative() {
    let dir = TempDir::new().unwrap();
    let paths = Paths::with_root(dir.path().join("trackdeck"));
    let flat = seed_fixture(&paths);

    // Unparseable statistics document fails the transform stage
    std::fs::write(
        flat.root().join("Team_Beta/queries/2/statistics.json"),
        "{ truncated",
    )
    .unwrap();

    let migrator = Migrator::new(paths.clone());
    assert!(migrator.run().is_err());

    assert!(!paths.database.exists());
    assert_eq!(migrator.state().unwrap(), MigrationState::NotStarted);

    // Every source row still readable
    assert_eq!(flat.entity_counts().unwrap().cached_records, 50);
    assert_eq!(
        flat.cached_records("Team Alpha", 1, &RecordFilter::default())
            .unwrap()
            .len(),
        50
    );
}

#[test]
fn test_migrate_refuses_over_prior_imports() {
    let dir = TempDir::new().unwrap();
    let paths = Paths::with_root(dir.path().join("trackdeck"));
    seed_fixture(&paths);

    // A profile lands in the relational store before migrate runs
    paths.ensure_dirs().unwrap();
    let store = SqliteStore::open_at(&paths.database).unwrap();
    store.save_profile(&Profile::new("Imported Early")).unwrap();

    let migrator = Migrator::new(paths);
    let err = migrator.run().unwrap_err();
    assert!(err.to_string().contains("not marked migrated"));

    // The early profile survives; the flag is still unset
    assert!(store.get_profile("Imported Early").unwrap().is_some());
    assert_eq!(migrator.state().unwrap(), MigrationState::NotStarted);
}

#[test]
fn test_export_import_round_trip_after_migration() {
    let dir = TempDir::new().unwrap();
    let paths = Paths::with_root(dir.path().join("trackdeck"));
    seed_fixture(&paths);
    Migrator::new(paths.clone()).run().unwrap();

    let store = SqliteStore::open_at(&paths.database).unwrap();
    let tree = dir.path().join("export");
    let exported = exchange::export_store(&store, &tree).unwrap();
    assert_eq!(exported, store.entity_counts().unwrap());

    // Importing a profile that already exists gets a fresh name
    let name = exchange::import_profile(&tree, "Team Alpha", &store).unwrap();
    assert_eq!(name, "Team Alpha (imported)");

    let counts = store.entity_counts().unwrap();
    assert_eq!(counts.profiles, 4);
    assert_eq!(counts.cached_records, 100);

    // A second export reflects the import
    let tree_two = dir.path().join("export-two");
    let re_exported = exchange::export_store(&store, &tree_two).unwrap();
    assert_eq!(re_exported, counts);
}
