//! Storage layer for trackdeck.
//!
//! This module provides persistence for:
//! - Profiles and their saved queries
//! - Cached tracker records and change events (with TTL)
//! - Statistics, metrics, and scope snapshots
//! - Application state and ephemeral task progress
//!
//! Business logic depends only on the [`StoreBackend`] trait; the
//! relational [`SqliteStore`] is the authoritative implementation and the
//! legacy [`FlatFileStore`] is retained for rollback and export/import.

pub mod cache;
mod database;
mod flatfile;
mod migrations;
mod sqlite;

pub use database::Database;
pub use flatfile::FlatFileStore;
pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    CachedRecord, ChangeEvent, EntityCounts, EventFilter, MetricDataPoint, MetricFilter, Profile,
    Query, RecordFilter, ScopeSnapshot, StatisticsPoint, TaskProgress,
};

/// The persistence interface.
///
/// One operation per entity lifecycle action, plus batch variants for
/// record collections. Every operation completes or fails atomically;
/// partial writes are never observable. Failures surface through the
/// typed [`StoreError`] taxonomy, never uncontrolled faults.
///
/// Operations scoped to a profile return [`StoreError::NotFound`] when
/// that profile does not exist. A missing query reads as `None` or an
/// empty collection, and rejects dependent writes with `NotFound`.
/// Every backend honors this contract identically.
#[cfg_attr(test, mockall::automock)]
pub trait StoreBackend {
    // ----- Profiles -----

    /// Fetch a profile by its unique name.
    fn get_profile(&self, name: &str) -> Result<Option<Profile>, StoreError>;

    /// List all profiles, ordered by name.
    fn list_profiles(&self) -> Result<Vec<Profile>, StoreError>;

    /// Insert or update a profile, keyed by name.
    ///
    /// Changing the field mapping invalidates every cached record
    /// computed under the old mapping.
    fn save_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    /// Delete a profile and cascade to its whole subtree.
    ///
    /// Returns `false` if no such profile existed.
    fn delete_profile(&self, name: &str) -> Result<bool, StoreError>;

    // ----- Queries -----

    /// Fetch a query by its composite identity `(profile, local id)`.
    fn get_query(&self, profile: &str, local_id: i64) -> Result<Option<Query>, StoreError>;

    /// List a profile's queries, ordered by local id.
    fn list_queries(&self, profile: &str) -> Result<Vec<Query>, StoreError>;

    /// Insert or update a query within its profile.
    fn save_query(&self, profile: &str, query: &Query) -> Result<(), StoreError>;

    /// Delete a query and its dependent rows.
    ///
    /// Returns `false` if no such query existed.
    fn delete_query(&self, profile: &str, local_id: i64) -> Result<bool, StoreError>;

    // ----- Application state -----

    /// Read an application state key.
    fn get_state(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write an application state key.
    fn set_state(&self, key: &str, value: &str) -> Result<(), StoreError>;

    // ----- Cached records -----

    /// Read cached records for a query. Expired rows are excluded unless
    /// the filter says otherwise.
    fn cached_records(
        &self,
        profile: &str,
        query: i64,
        filter: &RecordFilter,
    ) -> Result<Vec<CachedRecord>, StoreError>;

    /// Upsert a batch of cached records in a single transaction.
    fn save_cached_records(
        &self,
        profile: &str,
        query: i64,
        records: &[CachedRecord],
    ) -> Result<(), StoreError>;

    // ----- Change events -----

    /// Read change events for a query, optionally filtered by field and
    /// time window.
    fn change_events(
        &self,
        profile: &str,
        query: i64,
        filter: &EventFilter,
    ) -> Result<Vec<ChangeEvent>, StoreError>;

    /// Append a batch of change events in a single transaction.
    fn save_change_events(
        &self,
        profile: &str,
        query: i64,
        events: &[ChangeEvent],
    ) -> Result<(), StoreError>;

    // ----- Statistics -----

    /// Read all statistics points for a query, ordered by week.
    fn statistics_points(
        &self,
        profile: &str,
        query: i64,
    ) -> Result<Vec<StatisticsPoint>, StoreError>;

    /// Upsert a batch of statistics points in a single transaction.
    fn save_statistics_points(
        &self,
        profile: &str,
        query: i64,
        points: &[StatisticsPoint],
    ) -> Result<(), StoreError>;

    // ----- Scope snapshots -----

    /// Read the scope snapshot for a query, if one exists.
    fn scope_snapshot(&self, profile: &str, query: i64)
        -> Result<Option<ScopeSnapshot>, StoreError>;

    /// Overwrite the scope snapshot for a query.
    fn save_scope_snapshot(
        &self,
        profile: &str,
        query: i64,
        snapshot: &ScopeSnapshot,
    ) -> Result<(), StoreError>;

    // ----- Metric data points -----

    /// Read metric data points for a query, optionally filtered by
    /// metric name and bucket range.
    fn metric_points(
        &self,
        profile: &str,
        query: i64,
        filter: &MetricFilter,
    ) -> Result<Vec<MetricDataPoint>, StoreError>;

    /// Upsert a batch of metric data points in a single transaction.
    fn save_metric_points(
        &self,
        profile: &str,
        query: i64,
        points: &[MetricDataPoint],
    ) -> Result<(), StoreError>;

    // ----- Task progress -----

    /// Read progress for a task.
    fn task_progress(&self, task_id: &str) -> Result<Option<TaskProgress>, StoreError>;

    /// Insert or update progress for a task.
    fn save_task_progress(&self, progress: &TaskProgress) -> Result<(), StoreError>;

    /// Drop all task progress.
    ///
    /// The consuming application calls this once at startup; the store
    /// never clears progress on its own.
    fn clear_task_progress(&self) -> Result<(), StoreError>;

    // ----- Cache management -----

    /// Delete cached records and change events whose expiry has passed,
    /// along with events belonging to a removed record.
    ///
    /// Idempotent and safe to run concurrently with reads. Returns the
    /// number of rows removed, dependents included.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Explicitly drop all cached data for a query, forcing a re-fetch.
    fn invalidate_cache(&self, profile: &str, query: i64) -> Result<(), StoreError>;

    // ----- Validation -----

    /// Row counts per entity type, for migration validation.
    fn entity_counts(&self) -> Result<EntityCounts, StoreError>;
}
