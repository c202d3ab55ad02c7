//! Entity types owned by the trackdeck persistence layer.
//!
//! Every entity here is created, mutated, and destroyed only through a
//! [`StoreBackend`](crate::storage::StoreBackend) implementation. Records
//! belonging to a query reference their owner by `(profile name, query
//! local id)`; the local id is unique only within its profile.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known application state keys.
pub mod app_state {
    /// Set once migration has committed; gates re-runs.
    pub const MIGRATION_COMPLETE: &str = "migration_complete";
    /// Name of the currently selected profile.
    pub const ACTIVE_PROFILE: &str = "active_profile";
    /// Local id of the currently selected query.
    pub const ACTIVE_QUERY: &str = "active_query";
    /// Mirror of the relational schema version for flat-file exports.
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Keys carried across migration and export/import. Flags describing
    /// the store itself (migration status, schema version) are stamped by
    /// the destination, not copied.
    pub const PORTABLE: &[&str] = &[ACTIVE_PROFILE, ACTIVE_QUERY];
}

/// A named workspace holding connection, field-mapping, and forecast
/// configuration. Unique by name; deleting a profile cascades to all
/// dependent entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub connection: ConnectionConfig,
    pub field_mapping: FieldMapping,
    pub forecast: ForecastConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Create a profile with default configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            connection: ConnectionConfig::default(),
            field_mapping: FieldMapping::default(),
            forecast: ForecastConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn with_field_mapping(mut self, mapping: FieldMapping) -> Self {
        self.field_mapping = mapping;
        self
    }
}

/// Connection settings for the external issue tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub username: String,
    pub project_key: String,
}

/// Mapping of external tracker field ids to internal attribute names.
///
/// Cached records are computed under a specific mapping; changing it
/// invalidates the cache for every query in the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub fields: BTreeMap<String, String>,
}

impl FieldMapping {
    /// Insert a single external-to-internal field mapping.
    pub fn map(&mut self, external: impl Into<String>, internal: impl Into<String>) {
        self.fields.insert(external.into(), internal.into());
    }
}

/// Forecast parameters used when projecting remaining work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// How many weeks ahead to project.
    pub horizon_weeks: u32,
    /// Confidence level for forecast bounds (0.0 - 1.0).
    pub confidence: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_weeks: 12,
            confidence: 0.8,
        }
    }
}

/// A saved filter definition scoped to exactly one profile.
///
/// Identity is `(profile, local_id)`; the name is unique within the
/// owning profile only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Local id, unique within the owning profile.
    pub local_id: i64,
    pub name: String,
    /// The saved filter expression (JQL).
    pub filter: String,
    /// Display options that vary per query (chart toggles, grouping).
    #[serde(default)]
    pub options: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Query {
    /// Create a query with the given local id, name, and filter.
    #[must_use]
    pub fn new(local_id: i64, name: impl Into<String>, filter: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            local_id,
            name: name.into(),
            filter: filter.into(),
            options: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One externally-fetched issue record, scoped to a query.
///
/// Indexed scalar attributes are first-class columns; genuinely variable
/// attributes live in the narrow `payload` document. Superseded records
/// are replaced in place (upsert on the record key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    /// External record key (e.g. issue key `PROJ-42`). Upsert identity
    /// within the owning query.
    pub key: String,
    pub status: String,
    pub assignee: Option<String>,
    pub record_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// When this record was fetched from the tracker.
    pub fetched_at: DateTime<Utc>,
    /// Reads exclude the record once this instant has passed.
    pub expires_at: DateTime<Utc>,
    /// Small nested document for variable/optional attributes.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CachedRecord {
    /// Whether this record is stale as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// One atomic field transition belonging to a cached record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Key of the owning cached record.
    pub record_key: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    /// Expires together with the cache generation it was fetched with.
    pub expires_at: DateTime<Utc>,
}

/// Aggregate counts for one ISO-week time bucket of a query.
///
/// Appended incrementally; prior buckets are never rewritten. Counts are
/// non-negative by construction; `net_change` is the only signed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsPoint {
    /// ISO week bucket, e.g. `2026-W35`.
    pub week: String,
    pub created_count: u32,
    pub resolved_count: u32,
    pub open_count: u32,
    pub velocity: f64,
    /// Created minus resolved for the bucket; may be negative.
    pub net_change: i64,
}

/// Small aggregate document describing remaining/baseline work and the
/// current forecast for a query. Overwritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSnapshot {
    pub remaining: f64,
    pub baseline: f64,
    /// Projected weeks to completion, if a forecast could be computed.
    pub forecast_weeks: Option<f64>,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// One `(time bucket, metric name)` value belonging to a query.
///
/// Never a whole week's metrics as one blob; one row per metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDataPoint {
    /// ISO week bucket, e.g. `2026-W35`.
    pub bucket: String,
    pub metric: String,
    pub value: f64,
    pub unit: String,
    pub forecast_low: Option<f64>,
    pub forecast_high: Option<f64>,
}

/// Ephemeral per-task progress, independent of profile/query.
///
/// The consuming application clears all progress at startup via
/// [`clear_task_progress`](crate::storage::StoreBackend::clear_task_progress).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub label: String,
    pub current: u32,
    pub total: u32,
    pub updated_at: DateTime<Utc>,
}

/// Read filter for cached records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub record_type: Option<String>,
    /// Include rows whose expiry has passed (used by export).
    pub include_expired: bool,
    /// Expiry is evaluated against this instant; defaults to now.
    pub as_of: Option<DateTime<Utc>>,
}

impl RecordFilter {
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    #[must_use]
    pub const fn including_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }

    #[must_use]
    pub const fn as_of(mut self, at: DateTime<Utc>) -> Self {
        self.as_of = Some(at);
        self
    }
}

/// Read filter for change events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub field: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl EventFilter {
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    #[must_use]
    pub const fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }
}

/// Read filter for metric data points.
#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    pub metric: Option<String>,
    pub from_bucket: Option<String>,
    pub to_bucket: Option<String>,
}

impl MetricFilter {
    #[must_use]
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }
}

/// Per-entity row counts, used by the migration validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub profiles: usize,
    pub queries: usize,
    pub cached_records: usize,
    pub change_events: usize,
    pub statistics_points: usize,
    pub scope_snapshots: usize,
    pub metric_points: usize,
}

impl EntityCounts {
    /// Total rows across all entity types.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.profiles
            + self.queries
            + self.cached_records
            + self.change_events
            + self.statistics_points
            + self.scope_snapshots
            + self.metric_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_profile_builder() {
        let mut mapping = FieldMapping::default();
        mapping.map("customfield_10016", "story_points");

        let profile = Profile::new("Team Alpha").with_field_mapping(mapping);

        assert_eq!(profile.name, "Team Alpha");
        assert_eq!(
            profile.field_mapping.fields.get("customfield_10016"),
            Some(&"story_points".to_string())
        );
    }

    #[test]
    fn test_record_expiry_boundary() {
        let now = Utc::now();
        let mut record = sample_record("PROJ-1", now);

        record.expires_at = now - Duration::seconds(1);
        assert!(record.is_expired(now));

        record.expires_at = now + Duration::seconds(1);
        assert!(!record.is_expired(now));
    }

    #[test]
    fn test_entity_counts_total() {
        let counts = EntityCounts {
            profiles: 3,
            queries: 3,
            cached_records: 50,
            statistics_points: 24,
            ..EntityCounts::default()
        };
        assert_eq!(counts.total(), 80);
    }

    #[test]
    fn test_query_serde_round_trip() {
        let query = Query::new(1, "Open bugs", "project = PROJ AND type = Bug");
        let json = serde_json::to_string(&query).unwrap();
        let back: Query = serde_json::from_str(&json).unwrap();
        assert_eq!(back, query);
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
}
