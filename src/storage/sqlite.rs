//! Relational backend for the persistence interface.
//!
//! Implements [`StoreBackend`] against the SQLite store: per-operation
//! connections, parameterized statements only, and batch writes wrapped
//! in a single transaction so either every row commits or none does.
//! Common lookups ride composite indexes keyed by
//! `(profile, query, filter column)`.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, Transaction};
use tracing::debug;

use crate::config::Paths;
use crate::error::StoreError;
use crate::model::{
    CachedRecord, ChangeEvent, ConnectionConfig, EntityCounts, EventFilter, FieldMapping,
    ForecastConfig, MetricDataPoint, MetricFilter, Profile, Query, RecordFilter, ScopeSnapshot,
    StatisticsPoint, TaskProgress,
};

use super::{Database, StoreBackend};

/// SQLite-backed store, the authoritative backend after migration.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Open the store at the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or migrated.
    pub fn open(paths: &Paths) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open(paths)?,
        })
    }

    /// Open the store at a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open_at(path)?,
        })
    }

    /// Wrap an already-opened database handle.
    #[must_use]
    pub fn with_database(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Resolve a profile name to its row id.
    fn profile_id(conn: &Connection, name: &str) -> Result<i64, StoreError> {
        conn.query_row("SELECT id FROM profiles WHERE name = ?1", [name], |row| {
            row.get(0)
        })
        .optional()
        .map_err(StoreError::from)?
        .ok_or_else(|| StoreError::NotFound(format!("Profile '{name}'")))
    }

    /// Resolve a profile name, verifying the query exists under it.
    fn scope_ids(conn: &Connection, profile: &str, query: i64) -> Result<i64, StoreError> {
        let profile_id = Self::profile_id(conn, profile)?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT local_id FROM queries WHERE profile_id = ?1 AND local_id = ?2",
                params![profile_id, query],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;

        exists
            .map(|_| profile_id)
            .ok_or_else(|| StoreError::NotFound(format!("Query {query} in profile '{profile}'")))
    }
}

impl StoreBackend for SqliteStore {
    fn get_profile(&self, name: &str) -> Result<Option<Profile>, StoreError> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT name, connection_json, field_mapping_json, forecast_json, created_at, updated_at
                 FROM profiles WHERE name = ?1",
                [name],
                row_to_profile,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, connection_json, field_mapping_json, forecast_json, created_at, updated_at
                 FROM profiles ORDER BY name",
            )?;

            let profiles = stmt
                .query_map([], row_to_profile)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(profiles)
        })
    }

    fn save_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let connection_json = serde_json::to_string(&profile.connection)?;
        let mapping_json = serde_json::to_string(&profile.field_mapping)?;
        let forecast_json = serde_json::to_string(&profile.forecast)?;

        self.db.write(|tx| {
            let existing: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, field_mapping_json FROM profiles WHERE name = ?1",
                    [&profile.name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((id, old_mapping)) => {
                    tx.execute(
                        "UPDATE profiles
                         SET connection_json = ?1, field_mapping_json = ?2,
                             forecast_json = ?3, updated_at = ?4
                         WHERE id = ?5",
                        params![
                            connection_json,
                            mapping_json,
                            forecast_json,
                            profile.updated_at.to_rfc3339(),
                            id,
                        ],
                    )?;

                    // Records computed under the old mapping are stale
                    if old_mapping != mapping_json {
                        let dropped = tx.execute(
                            "DELETE FROM cached_records WHERE profile_id = ?1",
                            [id],
                        )?;
                        debug!(
                            profile = %profile.name,
                            dropped,
                            "field mapping changed, cache invalidated"
                        );
                    }
                }
                None => {
                    tx.execute(
                        "INSERT INTO profiles
                         (name, connection_json, field_mapping_json, forecast_json, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            profile.name,
                            connection_json,
                            mapping_json,
                            forecast_json,
                            profile.created_at.to_rfc3339(),
                            profile.updated_at.to_rfc3339(),
                        ],
                    )?;
                }
            }

            Ok(())
        })
    }

    fn delete_profile(&self, name: &str) -> Result<bool, StoreError> {
        self.db.write(|tx| {
            let rows = tx.execute("DELETE FROM profiles WHERE name = ?1", [name])?;
            Ok(rows > 0)
        })
    }

    fn get_query(&self, profile: &str, local_id: i64) -> Result<Option<Query>, StoreError> {
        self.db.read(|conn| {
            let profile_id = Self::profile_id(conn, profile)?;
            conn.query_row(
                "SELECT local_id, name, filter, options_json, created_at, updated_at
                 FROM queries WHERE profile_id = ?1 AND local_id = ?2",
                params![profile_id, local_id],
                row_to_query,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn list_queries(&self, profile: &str) -> Result<Vec<Query>, StoreError> {
        self.db.read(|conn| {
            let profile_id = Self::profile_id(conn, profile)?;
            let mut stmt = conn.prepare(
                "SELECT local_id, name, filter, options_json, created_at, updated_at
                 FROM queries WHERE profile_id = ?1 ORDER BY local_id",
            )?;

            let queries = stmt
                .query_map([profile_id], row_to_query)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(queries)
        })
    }

    fn save_query(&self, profile: &str, query: &Query) -> Result<(), StoreError> {
        let options_json = serde_json::to_string(&query.options)?;

        self.db.write(|tx| {
            let profile_id = Self::profile_id(tx, profile)?;
            tx.execute(
                "INSERT INTO queries
                 (profile_id, local_id, name, filter, options_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(profile_id, local_id) DO UPDATE SET
                     name = excluded.name,
                     filter = excluded.filter,
                     options_json = excluded.options_json,
                     updated_at = excluded.updated_at",
                params![
                    profile_id,
                    query.local_id,
                    query.name,
                    query.filter,
                    options_json,
                    query.created_at.to_rfc3339(),
                    query.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn delete_query(&self, profile: &str, local_id: i64) -> Result<bool, StoreError> {
        self.db.write(|tx| {
            let profile_id = Self::profile_id(tx, profile)?;
            let rows = tx.execute(
                "DELETE FROM queries WHERE profile_id = ?1 AND local_id = ?2",
                params![profile_id, local_id],
            )?;
            Ok(rows > 0)
        })
    }

    fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.read(|conn| {
            conn.query_row("SELECT value FROM app_state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn set_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn cached_records(
        &self,
        profile: &str,
        query: i64,
        filter: &RecordFilter,
    ) -> Result<Vec<CachedRecord>, StoreError> {
        self.db.read(|conn| {
            let profile_id = Self::profile_id(conn, profile)?;

            let mut sql = String::from(
                "SELECT record_key, status, assignee, record_type, created_at, updated_at,
                        resolved_at, fetched_at, expires_at, payload_json
                 FROM cached_records
                 WHERE profile_id = ?1 AND query_id = ?2",
            );
            let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(profile_id), Box::new(query)];

            if !filter.include_expired {
                let as_of = filter.as_of.unwrap_or_else(Utc::now);
                sql.push_str(" AND expires_at > ?");
                values.push(Box::new(as_of.to_rfc3339()));
            }
            if let Some(status) = &filter.status {
                sql.push_str(" AND status = ?");
                values.push(Box::new(status.clone()));
            }
            if let Some(assignee) = &filter.assignee {
                sql.push_str(" AND assignee = ?");
                values.push(Box::new(assignee.clone()));
            }
            if let Some(record_type) = &filter.record_type {
                sql.push_str(" AND record_type = ?");
                values.push(Box::new(record_type.clone()));
            }
            sql.push_str(" ORDER BY record_key");

            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())), row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(records)
        })
    }

    fn save_cached_records(
        &self,
        profile: &str,
        query: i64,
        records: &[CachedRecord],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        self.db.write(|tx| {
            let profile_id = Self::scope_ids(tx, profile, query)?;
            insert_records(tx, profile_id, query, records)
        })
    }

    fn change_events(
        &self,
        profile: &str,
        query: i64,
        filter: &EventFilter,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        self.db.read(|conn| {
            let profile_id = Self::profile_id(conn, profile)?;

            let mut sql = String::from(
                "SELECT record_key, field, old_value, new_value, actor, occurred_at, expires_at
                 FROM change_events
                 WHERE profile_id = ?1 AND query_id = ?2",
            );
            let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(profile_id), Box::new(query)];

            if let Some(field) = &filter.field {
                sql.push_str(" AND field = ?");
                values.push(Box::new(field.clone()));
            }
            if let Some(since) = filter.since {
                sql.push_str(" AND occurred_at >= ?");
                values.push(Box::new(since.to_rfc3339()));
            }
            if let Some(until) = filter.until {
                sql.push_str(" AND occurred_at < ?");
                values.push(Box::new(until.to_rfc3339()));
            }
            sql.push_str(" ORDER BY occurred_at");

            let mut stmt = conn.prepare(&sql)?;
            let events = stmt
                .query_map(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())), row_to_event)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(events)
        })
    }

    fn save_change_events(
        &self,
        profile: &str,
        query: i64,
        events: &[ChangeEvent],
    ) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        self.db.write(|tx| {
            let profile_id = Self::scope_ids(tx, profile, query)?;
            insert_events(tx, profile_id, query, events)
        })
    }

    fn statistics_points(
        &self,
        profile: &str,
        query: i64,
    ) -> Result<Vec<StatisticsPoint>, StoreError> {
        self.db.read(|conn| {
            let profile_id = Self::profile_id(conn, profile)?;
            let mut stmt = conn.prepare(
                "SELECT week, created_count, resolved_count, open_count, velocity, net_change
                 FROM statistics_points
                 WHERE profile_id = ?1 AND query_id = ?2
                 ORDER BY week",
            )?;

            let points = stmt
                .query_map(params![profile_id, query], row_to_stat)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(points)
        })
    }

    fn save_statistics_points(
        &self,
        profile: &str,
        query: i64,
        points: &[StatisticsPoint],
    ) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        self.db.write(|tx| {
            let profile_id = Self::scope_ids(tx, profile, query)?;
            insert_stats(tx, profile_id, query, points)
        })
    }

    fn scope_snapshot(
        &self,
        profile: &str,
        query: i64,
    ) -> Result<Option<ScopeSnapshot>, StoreError> {
        self.db.read(|conn| {
            let profile_id = Self::profile_id(conn, profile)?;
            conn.query_row(
                "SELECT remaining, baseline, forecast_weeks, detail_json, updated_at
                 FROM scope_snapshots
                 WHERE profile_id = ?1 AND query_id = ?2",
                params![profile_id, query],
                row_to_scope,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn save_scope_snapshot(
        &self,
        profile: &str,
        query: i64,
        snapshot: &ScopeSnapshot,
    ) -> Result<(), StoreError> {
        let detail_json = serde_json::to_string(&snapshot.detail)?;

        self.db.write(|tx| {
            let profile_id = Self::scope_ids(tx, profile, query)?;
            tx.execute(
                "INSERT INTO scope_snapshots
                 (profile_id, query_id, remaining, baseline, forecast_weeks, detail_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(profile_id, query_id) DO UPDATE SET
                     remaining = excluded.remaining,
                     baseline = excluded.baseline,
                     forecast_weeks = excluded.forecast_weeks,
                     detail_json = excluded.detail_json,
                     updated_at = excluded.updated_at",
                params![
                    profile_id,
                    query,
                    snapshot.remaining,
                    snapshot.baseline,
                    snapshot.forecast_weeks,
                    detail_json,
                    snapshot.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn metric_points(
        &self,
        profile: &str,
        query: i64,
        filter: &MetricFilter,
    ) -> Result<Vec<MetricDataPoint>, StoreError> {
        self.db.read(|conn| {
            let profile_id = Self::profile_id(conn, profile)?;

            let mut sql = String::from(
                "SELECT bucket, metric, value, unit, forecast_low, forecast_high
                 FROM metric_points
                 WHERE profile_id = ?1 AND query_id = ?2",
            );
            let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(profile_id), Box::new(query)];

            if let Some(metric) = &filter.metric {
                sql.push_str(" AND metric = ?");
                values.push(Box::new(metric.clone()));
            }
            if let Some(from) = &filter.from_bucket {
                sql.push_str(" AND bucket >= ?");
                values.push(Box::new(from.clone()));
            }
            if let Some(to) = &filter.to_bucket {
                sql.push_str(" AND bucket <= ?");
                values.push(Box::new(to.clone()));
            }
            sql.push_str(" ORDER BY bucket, metric");

            let mut stmt = conn.prepare(&sql)?;
            let points = stmt
                .query_map(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())), row_to_metric)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(points)
        })
    }

    fn save_metric_points(
        &self,
        profile: &str,
        query: i64,
        points: &[MetricDataPoint],
    ) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        self.db.write(|tx| {
            let profile_id = Self::scope_ids(tx, profile, query)?;
            insert_metrics(tx, profile_id, query, points)
        })
    }

    fn task_progress(&self, task_id: &str) -> Result<Option<TaskProgress>, StoreError> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT task_id, label, current, total, updated_at
                 FROM task_progress WHERE task_id = ?1",
                [task_id],
                row_to_progress,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn save_task_progress(&self, progress: &TaskProgress) -> Result<(), StoreError> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO task_progress (task_id, label, current, total, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(task_id) DO UPDATE SET
                     label = excluded.label,
                     current = excluded.current,
                     total = excluded.total,
                     updated_at = excluded.updated_at",
                params![
                    progress.task_id,
                    progress.label,
                    progress.current,
                    progress.total,
                    progress.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn clear_task_progress(&self) -> Result<(), StoreError> {
        self.db.write(|tx| {
            tx.execute("DELETE FROM task_progress", [])?;
            Ok(())
        })
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now.to_rfc3339();

        self.db.write(|tx| {
            let lapsed_events = tx.execute(
                "DELETE FROM change_events WHERE expires_at <= ?1",
                [&cutoff],
            )?;
            // Events on an expired record go with it; deleting them here
            // instead of through the cascade keeps them in the count
            let riding_events = tx.execute(
                "DELETE FROM change_events
                 WHERE (profile_id, query_id, record_key) IN (
                     SELECT profile_id, query_id, record_key
                     FROM cached_records WHERE expires_at <= ?1)",
                [&cutoff],
            )?;
            let records = tx.execute(
                "DELETE FROM cached_records WHERE expires_at <= ?1",
                [&cutoff],
            )?;
            debug!(records, lapsed_events, riding_events, "expired cache rows swept");
            Ok(records + lapsed_events + riding_events)
        })
    }

    fn invalidate_cache(&self, profile: &str, query: i64) -> Result<(), StoreError> {
        self.db.write(|tx| {
            let profile_id = Self::profile_id(tx, profile)?;
            tx.execute(
                "DELETE FROM cached_records WHERE profile_id = ?1 AND query_id = ?2",
                params![profile_id, query],
            )?;
            Ok(())
        })
    }

    fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
        self.db.read(|conn| {
            let count = |table: &str| -> Result<usize, StoreError> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })
                    .map_err(StoreError::from)?;
                Ok(usize::try_from(n).unwrap_or_default())
            };

            Ok(EntityCounts {
                profiles: count("profiles")?,
                queries: count("queries")?,
                cached_records: count("cached_records")?,
                change_events: count("change_events")?,
                statistics_points: count("statistics_points")?,
                scope_snapshots: count("scope_snapshots")?,
                metric_points: count("metric_points")?,
            })
        })
    }
}

// ----- Batch insert helpers (single prepared statement per batch) -----

fn insert_records(
    tx: &Transaction,
    profile_id: i64,
    query: i64,
    records: &[CachedRecord],
) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO cached_records
         (profile_id, query_id, record_key, status, assignee, record_type,
          created_at, updated_at, resolved_at, fetched_at, expires_at, payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(profile_id, query_id, record_key) DO UPDATE SET
             status = excluded.status,
             assignee = excluded.assignee,
             record_type = excluded.record_type,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             resolved_at = excluded.resolved_at,
             fetched_at = excluded.fetched_at,
             expires_at = excluded.expires_at,
             payload_json = excluded.payload_json",
    )?;

    for record in records {
        stmt.execute(params![
            profile_id,
            query,
            record.key,
            record.status,
            record.assignee,
            record.record_type,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
            record.resolved_at.map(|t| t.to_rfc3339()),
            record.fetched_at.to_rfc3339(),
            record.expires_at.to_rfc3339(),
            serde_json::to_string(&record.payload)?,
        ])?;
    }

    Ok(())
}

fn insert_events(
    tx: &Transaction,
    profile_id: i64,
    query: i64,
    events: &[ChangeEvent],
) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO change_events
         (profile_id, query_id, record_key, field, old_value, new_value, actor, occurred_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;

    for event in events {
        stmt.execute(params![
            profile_id,
            query,
            event.record_key,
            event.field,
            event.old_value,
            event.new_value,
            event.actor,
            event.occurred_at.to_rfc3339(),
            event.expires_at.to_rfc3339(),
        ])?;
    }

    Ok(())
}

fn insert_stats(
    tx: &Transaction,
    profile_id: i64,
    query: i64,
    points: &[StatisticsPoint],
) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO statistics_points
         (profile_id, query_id, week, created_count, resolved_count, open_count, velocity, net_change)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(profile_id, query_id, week) DO UPDATE SET
             created_count = excluded.created_count,
             resolved_count = excluded.resolved_count,
             open_count = excluded.open_count,
             velocity = excluded.velocity,
             net_change = excluded.net_change",
    )?;

    for point in points {
        stmt.execute(params![
            profile_id,
            query,
            point.week,
            point.created_count,
            point.resolved_count,
            point.open_count,
            point.velocity,
            point.net_change,
        ])?;
    }

    Ok(())
}

fn insert_metrics(
    tx: &Transaction,
    profile_id: i64,
    query: i64,
    points: &[MetricDataPoint],
) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO metric_points
         (profile_id, query_id, bucket, metric, value, unit, forecast_low, forecast_high)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(profile_id, query_id, bucket, metric) DO UPDATE SET
             value = excluded.value,
             unit = excluded.unit,
             forecast_low = excluded.forecast_low,
             forecast_high = excluded.forecast_high",
    )?;

    for point in points {
        stmt.execute(params![
            profile_id,
            query,
            point.bucket,
            point.metric,
            point.value,
            point.unit,
            point.forecast_low,
            point.forecast_high,
        ])?;
    }

    Ok(())
}

// ----- Row mapping -----

fn parse_time(index: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json(index: usize, raw: Option<String>) -> Result<serde_json::Value, rusqlite::Error> {
    match raw {
        None => Ok(serde_json::Value::Null),
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

fn parse_doc<T: serde::de::DeserializeOwned>(
    index: usize,
    raw: &str,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_profile(row: &Row<'_>) -> Result<Profile, rusqlite::Error> {
    let connection: ConnectionConfig = parse_doc(1, &row.get::<_, String>(1)?)?;
    let field_mapping: FieldMapping = parse_doc(2, &row.get::<_, String>(2)?)?;
    let forecast: ForecastConfig = parse_doc(3, &row.get::<_, String>(3)?)?;

    Ok(Profile {
        name: row.get(0)?,
        connection,
        field_mapping,
        forecast,
        created_at: parse_time(4, &row.get::<_, String>(4)?)?,
        updated_at: parse_time(5, &row.get::<_, String>(5)?)?,
    })
}

fn row_to_query(row: &Row<'_>) -> Result<Query, rusqlite::Error> {
    Ok(Query {
        local_id: row.get(0)?,
        name: row.get(1)?,
        filter: row.get(2)?,
        options: parse_json(3, row.get(3)?)?,
        created_at: parse_time(4, &row.get::<_, String>(4)?)?,
        updated_at: parse_time(5, &row.get::<_, String>(5)?)?,
    })
}

fn row_to_record(row: &Row<'_>) -> Result<CachedRecord, rusqlite::Error> {
    let resolved_at = row
        .get::<_, Option<String>>(6)?
        .map(|raw| parse_time(6, &raw))
        .transpose()?;

    Ok(CachedRecord {
        key: row.get(0)?,
        status: row.get(1)?,
        assignee: row.get(2)?,
        record_type: row.get(3)?,
        created_at: parse_time(4, &row.get::<_, String>(4)?)?,
        updated_at: parse_time(5, &row.get::<_, String>(5)?)?,
        resolved_at,
        fetched_at: parse_time(7, &row.get::<_, String>(7)?)?,
        expires_at: parse_time(8, &row.get::<_, String>(8)?)?,
        payload: parse_json(9, row.get(9)?)?,
    })
}

fn row_to_event(row: &Row<'_>) -> Result<ChangeEvent, rusqlite::Error> {
    Ok(ChangeEvent {
        record_key: row.get(0)?,
        field: row.get(1)?,
        old_value: row.get(2)?,
        new_value: row.get(3)?,
        actor: row.get(4)?,
        occurred_at: parse_time(5, &row.get::<_, String>(5)?)?,
        expires_at: parse_time(6, &row.get::<_, String>(6)?)?,
    })
}

fn row_to_stat(row: &Row<'_>) -> Result<StatisticsPoint, rusqlite::Error> {
    Ok(StatisticsPoint {
        week: row.get(0)?,
        created_count: row.get(1)?,
        resolved_count: row.get(2)?,
        open_count: row.get(3)?,
        velocity: row.get(4)?,
        net_change: row.get(5)?,
    })
}

fn row_to_scope(row: &Row<'_>) -> Result<ScopeSnapshot, rusqlite::Error> {
    Ok(ScopeSnapshot {
        remaining: row.get(0)?,
        baseline: row.get(1)?,
        forecast_weeks: row.get(2)?,
        detail: parse_json(3, row.get(3)?)?,
        updated_at: parse_time(4, &row.get::<_, String>(4)?)?,
    })
}

fn row_to_metric(row: &Row<'_>) -> Result<MetricDataPoint, rusqlite::Error> {
    Ok(MetricDataPoint {
        bucket: row.get(0)?,
        metric: row.get(1)?,
        value: row.get(2)?,
        unit: row.get(3)?,
        forecast_low: row.get(4)?,
        forecast_high: row.get(5)?,
    })
}

fn row_to_progress(row: &Row<'_>) -> Result<TaskProgress, rusqlite::Error> {
    Ok(TaskProgress {
        task_id: row.get(0)?,
        label: row.get(1)?,
        current: row.get(2)?,
        total: row.get(3)?,
        updated_at: parse_time(4, &row.get::<_, String>(4)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open_at(&temp_dir.path().join("test.db")).unwrap();
        (temp_dir, store)
    }

    fn seed_query(store: &SqliteStore, profile: &str, local_id: i64) {
        store.save_profile(&Profile::new(profile)).unwrap();
        store
            .save_query(profile, &Query::new(local_id, format!("q{local_id}"), "type = Bug"))
            .unwrap();
    }

    fn sample_record(key: &str, now: DateTime<Utc>) -> CachedRecord {
        CachedRecord {
            key: key.to_string(),
            status: "Open".to_string(),
            assignee: Some("dana".to_string()),
            record_type: "Bug".to_string(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            fetched_at: now,
            expires_at: now + Duration::hours(24),
            payload: serde_json::json!({"story_points": 3}),
        }
    }

    fn sample_stat(week: &str) -> StatisticsPoint {
        StatisticsPoint {
            week: week.to_string(),
            created_count: 4,
            resolved_count: 2,
            open_count: 10,
            velocity: 2.5,
            net_change: 2,
        }
    }

    #[test]
    fn test_profile_crud() {
        let (_dir, store) = open_store();

        let profile = Profile::new("Team Alpha");
        store.save_profile(&profile).unwrap();

        let loaded = store.get_profile("Team Alpha").unwrap().unwrap();
        assert_eq!(loaded.name, "Team Alpha");

        assert!(store.get_profile("nope").unwrap().is_none());
        assert_eq!(store.list_profiles().unwrap().len(), 1);

        assert!(store.delete_profile("Team Alpha").unwrap());
        assert!(!store.delete_profile("Team Alpha").unwrap());
    }

    #[test]
    fn test_query_name_unique_within_profile() {
        let (_dir, store) = open_store();
        store.save_profile(&Profile::new("A")).unwrap();
        store.save_profile(&Profile::new("B")).unwrap();

        store.save_query("A", &Query::new(1, "Bugs", "f")).unwrap();

        // Same name under a different local id in the same profile fails
        let dup = store.save_query("A", &Query::new(2, "Bugs", "f"));
        assert!(matches!(dup, Err(StoreError::ConstraintViolation(_))));

        // Same name in another profile is fine
        store.save_query("B", &Query::new(1, "Bugs", "f")).unwrap();
    }

    #[test]
    fn test_save_query_unknown_profile() {
        let (_dir, store) = open_store();
        let result = store.save_query("ghost", &Query::new(1, "Bugs", "f"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_app_state_round_trip() {
        let (_dir, store) = open_store();

        assert!(store.get_state("active_profile").unwrap().is_none());
        store.set_state("active_profile", "Team Alpha").unwrap();
        store.set_state("active_profile", "Team Beta").unwrap();

        assert_eq!(
            store.get_state("active_profile").unwrap().as_deref(),
            Some("Team Beta")
        );
    }

    #[test]
    fn test_record_upsert_replaces_in_place() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);
        let now = Utc::now();

        let mut record = sample_record("PROJ-1", now);
        store.save_cached_records("A", 1, &[record.clone()]).unwrap();

        record.status = "Done".to_string();
        store.save_cached_records("A", 1, &[record]).unwrap();

        let records = store
            .cached_records("A", 1, &RecordFilter::default())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "Done");
    }

    #[test]
    fn test_record_filter_by_status() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);
        let now = Utc::now();

        let mut open = sample_record("PROJ-1", now);
        open.status = "Open".to_string();
        let mut done = sample_record("PROJ-2", now);
        done.status = "Done".to_string();
        store.save_cached_records("A", 1, &[open, done]).unwrap();

        let only_open = store
            .cached_records("A", 1, &RecordFilter::default().with_status("Open"))
            .unwrap();
        assert_eq!(only_open.len(), 1);
        assert_eq!(only_open[0].key, "PROJ-1");
    }

    #[test]
    fn test_ttl_boundary() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);
        let now = Utc::now();

        let mut lapsed = sample_record("PROJ-1", now);
        lapsed.expires_at = now - Duration::seconds(1);
        let mut fresh = sample_record("PROJ-2", now);
        fresh.expires_at = now + Duration::seconds(1);
        store.save_cached_records("A", 1, &[lapsed, fresh]).unwrap();

        let visible = store
            .cached_records("A", 1, &RecordFilter::default().as_of(now))
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].key, "PROJ-2");

        let all = store
            .cached_records("A", 1, &RecordFilter::default().including_expired())
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_atomic_batch_write() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);

        let mut batch: Vec<StatisticsPoint> =
            (1..=5).map(|i| sample_stat(&format!("2026-W0{i}"))).collect();
        batch[3].velocity = -1.0; // violates the non-negative check

        let result = store.save_statistics_points("A", 1, &batch);
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));

        // None of the five rows may be visible
        assert!(store.statistics_points("A", 1).unwrap().is_empty());
    }

    #[test]
    fn test_cascade_delete_profile_subtree() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);
        let now = Utc::now();

        let record = sample_record("PROJ-1", now);
        store.save_cached_records("A", 1, &[record]).unwrap();
        store
            .save_change_events(
                "A",
                1,
                &[ChangeEvent {
                    record_key: "PROJ-1".to_string(),
                    field: "status".to_string(),
                    old_value: Some("Open".to_string()),
                    new_value: Some("Done".to_string()),
                    actor: "dana".to_string(),
                    occurred_at: now,
                    expires_at: now + Duration::hours(24),
                }],
            )
            .unwrap();
        store
            .save_statistics_points("A", 1, &[sample_stat("2026-W01")])
            .unwrap();
        store
            .save_metric_points(
                "A",
                1,
                &[MetricDataPoint {
                    bucket: "2026-W01".to_string(),
                    metric: "throughput".to_string(),
                    value: 4.0,
                    unit: "issues/week".to_string(),
                    forecast_low: None,
                    forecast_high: None,
                }],
            )
            .unwrap();

        assert!(store.delete_profile("A").unwrap());

        let counts = store.entity_counts().unwrap();
        assert_eq!(counts.total(), 0, "no orphaned rows may remain");
    }

    #[test]
    fn test_sweep_expired_is_idempotent() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);
        let now = Utc::now();

        let mut lapsed = sample_record("PROJ-1", now);
        lapsed.expires_at = now - Duration::hours(1);
        store.save_cached_records("A", 1, &[lapsed]).unwrap();

        assert_eq!(store.sweep_expired(now).unwrap(), 1);
        assert_eq!(store.sweep_expired(now).unwrap(), 0);
    }

    #[test]
    fn test_sweep_counts_events_of_expired_records() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);
        let now = Utc::now();

        let mut lapsed = sample_record("PROJ-1", now);
        lapsed.expires_at = now - Duration::hours(1);
        store.save_cached_records("A", 1, &[lapsed]).unwrap();
        store
            .save_change_events(
                "A",
                1,
                &[ChangeEvent {
                    record_key: "PROJ-1".to_string(),
                    field: "status".to_string(),
                    old_value: None,
                    new_value: Some("Open".to_string()),
                    actor: "dana".to_string(),
                    occurred_at: now,
                    // Outlives its record, swept with it anyway
                    expires_at: now + Duration::hours(1),
                }],
            )
            .unwrap();

        assert_eq!(store.sweep_expired(now).unwrap(), 2);
        assert_eq!(store.entity_counts().unwrap().change_events, 0);
        assert_eq!(store.sweep_expired(now).unwrap(), 0);
    }

    #[test]
    fn test_reads_for_unknown_profile() {
        let (_dir, store) = open_store();

        assert!(matches!(
            store.cached_records("ghost", 1, &RecordFilter::default()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_query("ghost", 1),
            Err(StoreError::NotFound(_))
        ));

        // A present profile with no query still reads as empty
        store.save_profile(&Profile::new("A")).unwrap();
        assert!(store
            .cached_records("A", 9, &RecordFilter::default())
            .unwrap()
            .is_empty());
        assert!(store.get_query("A", 9).unwrap().is_none());
    }

    #[test]
    fn test_mapping_change_invalidates_cache() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);
        let now = Utc::now();
        store
            .save_cached_records("A", 1, &[sample_record("PROJ-1", now)])
            .unwrap();

        let mut profile = store.get_profile("A").unwrap().unwrap();
        profile.field_mapping.map("customfield_10016", "story_points");
        store.save_profile(&profile).unwrap();

        let records = store
            .cached_records("A", 1, &RecordFilter::default().including_expired())
            .unwrap();
        assert!(records.is_empty(), "stale cache must be dropped");
    }

    #[test]
    fn test_scope_snapshot_overwritten_in_place() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);
        let now = Utc::now();

        let mut snapshot = ScopeSnapshot {
            remaining: 42.0,
            baseline: 100.0,
            forecast_weeks: Some(6.0),
            detail: serde_json::json!({"unit": "story_points"}),
            updated_at: now,
        };
        store.save_scope_snapshot("A", 1, &snapshot).unwrap();

        snapshot.remaining = 38.0;
        store.save_scope_snapshot("A", 1, &snapshot).unwrap();

        let loaded = store.scope_snapshot("A", 1).unwrap().unwrap();
        assert!((loaded.remaining - 38.0).abs() < f64::EPSILON);
        assert_eq!(store.entity_counts().unwrap().scope_snapshots, 1);
    }

    #[test]
    fn test_task_progress_cleared() {
        let (_dir, store) = open_store();

        store
            .save_task_progress(&TaskProgress {
                task_id: "fetch".to_string(),
                label: "Fetching records".to_string(),
                current: 10,
                total: 50,
                updated_at: Utc::now(),
            })
            .unwrap();
        assert!(store.task_progress("fetch").unwrap().is_some());

        store.clear_task_progress().unwrap();
        assert!(store.task_progress("fetch").unwrap().is_none());
    }

    #[test]
    fn test_metric_filter_by_name_and_range() {
        let (_dir, store) = open_store();
        seed_query(&store, "A", 1);

        let points: Vec<MetricDataPoint> = ["2026-W01", "2026-W02", "2026-W03"]
            .iter()
            .flat_map(|bucket| {
                ["throughput", "cycle_time"].iter().map(|metric| MetricDataPoint {
                    bucket: (*bucket).to_string(),
                    metric: (*metric).to_string(),
                    value: 1.0,
                    unit: "x".to_string(),
                    forecast_low: None,
                    forecast_high: None,
                })
            })
            .collect();
        store.save_metric_points("A", 1, &points).unwrap();

        let filter = MetricFilter {
            metric: Some("throughput".to_string()),
            from_bucket: Some("2026-W02".to_string()),
            to_bucket: None,
        };
        let result = store.metric_points("A", 1, &filter).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|p| p.metric == "throughput"));
    }
}
