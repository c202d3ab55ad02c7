//! Schema definition and versioning for the relational store.
//!
//! Each migration upgrades the schema by one version. Migrations run
//! automatically when the store is opened; the version marker lives in
//! `PRAGMA user_version`.

use rusqlite::Connection;

use crate::error::StoreError;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Get the current schema version from the store.
///
/// Returns 0 if no version has been set (new store).
pub fn get_version(conn: &Connection) -> Result<i32, StoreError> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| StoreError::Database(format!("Failed to get schema version: {e}")))?;

    Ok(version)
}

/// Set the schema version in the store.
fn set_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| StoreError::Database(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), StoreError> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: i32) -> Result<(), StoreError> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(StoreError::Database(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: the normalized table set.
///
/// Collection data is one row per element with indexed scalar columns
/// and a narrow JSON payload for genuinely variable attributes, never
/// one opaque blob per collection. Dependent rows reference their owner
/// with `ON DELETE CASCADE`, so deleting a profile removes its whole
/// subtree in one statement.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r"
        -- Workspaces
        CREATE TABLE IF NOT EXISTS profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            connection_json TEXT NOT NULL,
            field_mapping_json TEXT NOT NULL,
            forecast_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Saved filters; local_id is unique per profile, not globally
        CREATE TABLE IF NOT EXISTS queries (
            profile_id INTEGER NOT NULL
                REFERENCES profiles(id) ON DELETE CASCADE,
            local_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            filter TEXT NOT NULL,
            options_json TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (profile_id, local_id),
            UNIQUE (profile_id, name)
        );

        -- Process-wide key-value register
        CREATE TABLE IF NOT EXISTS app_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Externally-fetched records, one row per issue, upsert on key
        CREATE TABLE IF NOT EXISTS cached_records (
            profile_id INTEGER NOT NULL,
            query_id INTEGER NOT NULL,
            record_key TEXT NOT NULL,
            status TEXT NOT NULL,
            assignee TEXT,
            record_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            resolved_at TEXT,
            fetched_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            payload_json TEXT,
            PRIMARY KEY (profile_id, query_id, record_key),
            FOREIGN KEY (profile_id, query_id)
                REFERENCES queries(profile_id, local_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_cached_records_status
        ON cached_records(profile_id, query_id, status);

        CREATE INDEX IF NOT EXISTS idx_cached_records_assignee
        ON cached_records(profile_id, query_id, assignee);

        CREATE INDEX IF NOT EXISTS idx_cached_records_expires
        ON cached_records(expires_at);

        -- One row per atomic field transition of a cached record
        CREATE TABLE IF NOT EXISTS change_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id INTEGER NOT NULL,
            query_id INTEGER NOT NULL,
            record_key TEXT NOT NULL,
            field TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            actor TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY (profile_id, query_id, record_key)
                REFERENCES cached_records(profile_id, query_id, record_key)
                ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_change_events_field
        ON change_events(profile_id, query_id, field, occurred_at);

        CREATE INDEX IF NOT EXISTS idx_change_events_expires
        ON change_events(expires_at);

        -- One row per ISO week bucket, append-only
        CREATE TABLE IF NOT EXISTS statistics_points (
            profile_id INTEGER NOT NULL,
            query_id INTEGER NOT NULL,
            week TEXT NOT NULL,
            created_count INTEGER NOT NULL CHECK (created_count >= 0),
            resolved_count INTEGER NOT NULL CHECK (resolved_count >= 0),
            open_count INTEGER NOT NULL CHECK (open_count >= 0),
            velocity REAL NOT NULL CHECK (velocity >= 0),
            net_change INTEGER NOT NULL,
            PRIMARY KEY (profile_id, query_id, week),
            FOREIGN KEY (profile_id, query_id)
                REFERENCES queries(profile_id, local_id) ON DELETE CASCADE
        );

        -- One small aggregate document per query, overwritten in place
        CREATE TABLE IF NOT EXISTS scope_snapshots (
            profile_id INTEGER NOT NULL,
            query_id INTEGER NOT NULL,
            remaining REAL NOT NULL CHECK (remaining >= 0),
            baseline REAL NOT NULL CHECK (baseline >= 0),
            forecast_weeks REAL,
            detail_json TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (profile_id, query_id),
            FOREIGN KEY (profile_id, query_id)
                REFERENCES queries(profile_id, local_id) ON DELETE CASCADE
        );

        -- One row per (bucket, metric); net_* metrics may go negative
        CREATE TABLE IF NOT EXISTS metric_points (
            profile_id INTEGER NOT NULL,
            query_id INTEGER NOT NULL,
            bucket TEXT NOT NULL,
            metric TEXT NOT NULL,
            value REAL NOT NULL CHECK (value >= 0 OR metric LIKE 'net_%'),
            unit TEXT NOT NULL,
            forecast_low REAL,
            forecast_high REAL,
            PRIMARY KEY (profile_id, query_id, bucket, metric),
            FOREIGN KEY (profile_id, query_id)
                REFERENCES queries(profile_id, local_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_metric_points_metric
        ON metric_points(profile_id, query_id, metric, bucket);

        -- Ephemeral task progress, cleared by the application at startup
        CREATE TABLE IF NOT EXISTS task_progress (
            task_id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            current INTEGER NOT NULL CHECK (current >= 0),
            total INTEGER NOT NULL CHECK (total >= 0),
            updated_at TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| StoreError::Database(format!("Migration v1 failed: {e}")))
}
