//! Legacy flat-file backend.
//!
//! The original store layout: one JSON document per profile, per query,
//! and per cache type under a predictable directory hierarchy:
//!
//! ```text
//! <root>/app_state.json
//! <root>/task_progress.json
//! <root>/<profile>/profile.json
//! <root>/<profile>/queries/<local_id>/query.json
//! <root>/<profile>/queries/<local_id>/records.json
//! <root>/<profile>/queries/<local_id>/changes.json
//! <root>/<profile>/queries/<local_id>/statistics.json
//! <root>/<profile>/queries/<local_id>/metrics.json
//! <root>/<profile>/queries/<local_id>/scope.json
//! ```
//!
//! Retained for rollback and export/import after migration; implements
//! the same [`StoreBackend`] contract as the relational store, with
//! filters and expiry applied in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Paths;
use crate::error::StoreError;
use crate::model::{
    CachedRecord, ChangeEvent, EntityCounts, EventFilter, MetricDataPoint, MetricFilter, Profile,
    Query, RecordFilter, ScopeSnapshot, StatisticsPoint, TaskProgress,
};

use super::StoreBackend;

const PROFILE_DOC: &str = "profile.json";
const QUERY_DOC: &str = "query.json";
const RECORDS_DOC: &str = "records.json";
const CHANGES_DOC: &str = "changes.json";
const STATISTICS_DOC: &str = "statistics.json";
const METRICS_DOC: &str = "metrics.json";
const SCOPE_DOC: &str = "scope.json";
const APP_STATE_DOC: &str = "app_state.json";
const TASK_PROGRESS_DOC: &str = "task_progress.json";

/// Flat-file store rooted at the legacy profiles directory.
#[derive(Debug, Clone)]
pub struct FlatFileStore {
    root: PathBuf,
}

impl FlatFileStore {
    /// Open the flat-file tree at the default location.
    #[must_use]
    pub fn open(paths: &Paths) -> Self {
        Self::with_root(paths.profiles.clone())
    }

    /// Open a flat-file tree at a custom root (testing, export targets).
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root directory of the tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitize an entity name for use as a directory name.
    fn sanitize_name(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn profile_dir(&self, name: &str) -> PathBuf {
        self.root.join(Self::sanitize_name(name))
    }

    fn query_dir(&self, profile: &str, local_id: i64) -> PathBuf {
        self.profile_dir(profile)
            .join("queries")
            .join(local_id.to_string())
    }

    /// Profile directory, verified to exist.
    fn existing_profile_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        let dir = self.profile_dir(name);
        if !dir.join(PROFILE_DOC).exists() {
            return Err(StoreError::NotFound(format!("Profile '{name}'")));
        }
        Ok(dir)
    }

    /// Query directory, verified to exist.
    fn existing_query_dir(&self, profile: &str, local_id: i64) -> Result<PathBuf, StoreError> {
        self.existing_profile_dir(profile)?;
        let dir = self.query_dir(profile, local_id);
        if !dir.join(QUERY_DOC).exists() {
            return Err(StoreError::NotFound(format!(
                "Query {local_id} in profile '{profile}'"
            )));
        }
        Ok(dir)
    }

    fn read_doc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(StoreError::Io)?;
        let value = serde_json::from_str(&content).map_err(|e| {
            StoreError::Serialization(format!("Failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(value))
    }

    fn write_doc<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
        }
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(path, content).map_err(StoreError::Io)
    }

    /// Load a collection document, treating a missing file as empty.
    fn read_collection<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
        Ok(Self::read_doc(path)?.unwrap_or_default())
    }

    fn app_state_map(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(Self::read_doc(&self.root.join(APP_STATE_DOC))?.unwrap_or_default())
    }

    fn task_progress_map(&self) -> Result<BTreeMap<String, TaskProgress>, StoreError> {
        Ok(Self::read_doc(&self.root.join(TASK_PROGRESS_DOC))?.unwrap_or_default())
    }

    /// Every query directory in the tree, as `(profile name, local id)`.
    fn all_query_dirs(&self) -> Result<Vec<(String, i64, PathBuf)>, StoreError> {
        let mut dirs = Vec::new();
        for profile in self.list_profiles()? {
            for query in self.list_queries(&profile.name)? {
                dirs.push((
                    profile.name.clone(),
                    query.local_id,
                    self.query_dir(&profile.name, query.local_id),
                ));
            }
        }
        Ok(dirs)
    }
}

impl StoreBackend for FlatFileStore {
    fn get_profile(&self, name: &str) -> Result<Option<Profile>, StoreError> {
        Self::read_doc(&self.profile_dir(name).join(PROFILE_DOC))
    }

    fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut profiles = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(StoreError::Io)? {
            let entry = entry.map_err(StoreError::Io)?;
            let doc = entry.path().join(PROFILE_DOC);
            if let Some(profile) = Self::read_doc::<Profile>(&doc)? {
                profiles.push(profile);
            }
        }

        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    fn save_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let dir = self.profile_dir(&profile.name);
        let doc = dir.join(PROFILE_DOC);

        // Same invalidation contract as the relational store
        if let Some(existing) = Self::read_doc::<Profile>(&doc)? {
            if existing.field_mapping != profile.field_mapping {
                for query in self.list_queries(&profile.name)? {
                    self.invalidate_cache(&profile.name, query.local_id)?;
                }
            }
        }

        Self::write_doc(&doc, profile)
    }

    fn delete_profile(&self, name: &str) -> Result<bool, StoreError> {
        let dir = self.profile_dir(name);
        if !dir.join(PROFILE_DOC).exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(StoreError::Io)?;
        Ok(true)
    }

    fn get_query(&self, profile: &str, local_id: i64) -> Result<Option<Query>, StoreError> {
        self.existing_profile_dir(profile)?;
        Self::read_doc(&self.query_dir(profile, local_id).join(QUERY_DOC))
    }

    fn list_queries(&self, profile: &str) -> Result<Vec<Query>, StoreError> {
        let queries_dir = self.existing_profile_dir(profile)?.join("queries");
        if !queries_dir.exists() {
            return Ok(Vec::new());
        }

        let mut queries = Vec::new();
        for entry in std::fs::read_dir(&queries_dir).map_err(StoreError::Io)? {
            let entry = entry.map_err(StoreError::Io)?;
            let doc = entry.path().join(QUERY_DOC);
            if let Some(query) = Self::read_doc::<Query>(&doc)? {
                queries.push(query);
            }
        }

        queries.sort_by_key(|q| q.local_id);
        Ok(queries)
    }

    fn save_query(&self, profile: &str, query: &Query) -> Result<(), StoreError> {
        self.existing_profile_dir(profile)?;

        // Name must be unique within the profile
        let clash = self
            .list_queries(profile)?
            .into_iter()
            .any(|q| q.name == query.name && q.local_id != query.local_id);
        if clash {
            return Err(StoreError::ConstraintViolation(format!(
                "Query name '{}' already exists in profile '{profile}'",
                query.name
            )));
        }

        Self::write_doc(
            &self.query_dir(profile, query.local_id).join(QUERY_DOC),
            query,
        )
    }

    fn delete_query(&self, profile: &str, local_id: i64) -> Result<bool, StoreError> {
        self.existing_profile_dir(profile)?;
        let dir = self.query_dir(profile, local_id);
        if !dir.join(QUERY_DOC).exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(StoreError::Io)?;
        Ok(true)
    }

    fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.app_state_map()?.get(key).cloned())
    }

    fn set_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.app_state_map()?;
        map.insert(key.to_string(), value.to_string());
        Self::write_doc(&self.root.join(APP_STATE_DOC), &map)
    }

    fn cached_records(
        &self,
        profile: &str,
        query: i64,
        filter: &RecordFilter,
    ) -> Result<Vec<CachedRecord>, StoreError> {
        self.existing_profile_dir(profile)?;
        let path = self.query_dir(profile, query).join(RECORDS_DOC);
        let as_of = filter.as_of.unwrap_or_else(Utc::now);

        let mut records: Vec<CachedRecord> = Self::read_collection(&path)?
            .into_iter()
            .filter(|r: &CachedRecord| filter.include_expired || !r.is_expired(as_of))
            .filter(|r| filter.status.as_ref().is_none_or(|s| &r.status == s))
            .filter(|r| filter.assignee.as_ref().is_none_or(|a| r.assignee.as_ref() == Some(a)))
            .filter(|r| filter.record_type.as_ref().is_none_or(|t| &r.record_type == t))
            .collect();

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
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
        let dir = self.existing_query_dir(profile, query)?;
        let path = dir.join(RECORDS_DOC);

        // Upsert on record key
        let mut existing: Vec<CachedRecord> = Self::read_collection(&path)?;
        for record in records {
            match existing.iter_mut().find(|r| r.key == record.key) {
                Some(slot) => *slot = record.clone(),
                None => existing.push(record.clone()),
            }
        }

        Self::write_doc(&path, &existing)
    }

    fn change_events(
        &self,
        profile: &str,
        query: i64,
        filter: &EventFilter,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        self.existing_profile_dir(profile)?;
        let path = self.query_dir(profile, query).join(CHANGES_DOC);

        let mut events: Vec<ChangeEvent> = Self::read_collection(&path)?
            .into_iter()
            .filter(|e: &ChangeEvent| filter.field.as_ref().is_none_or(|f| &e.field == f))
            .filter(|e| filter.since.is_none_or(|since| e.occurred_at >= since))
            .filter(|e| filter.until.is_none_or(|until| e.occurred_at < until))
            .collect();

        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
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
        let dir = self.existing_query_dir(profile, query)?;
        let path = dir.join(CHANGES_DOC);

        let mut existing: Vec<ChangeEvent> = Self::read_collection(&path)?;
        existing.extend_from_slice(events);
        Self::write_doc(&path, &existing)
    }

    fn statistics_points(
        &self,
        profile: &str,
        query: i64,
    ) -> Result<Vec<StatisticsPoint>, StoreError> {
        self.existing_profile_dir(profile)?;
        let path = self.query_dir(profile, query).join(STATISTICS_DOC);
        let mut points: Vec<StatisticsPoint> = Self::read_collection(&path)?;
        points.sort_by(|a, b| a.week.cmp(&b.week));
        Ok(points)
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
        let dir = self.existing_query_dir(profile, query)?;
        let path = dir.join(STATISTICS_DOC);

        let mut existing: Vec<StatisticsPoint> = Self::read_collection(&path)?;
        for point in points {
            match existing.iter_mut().find(|p| p.week == point.week) {
                Some(slot) => *slot = point.clone(),
                None => existing.push(point.clone()),
            }
        }
        Self::write_doc(&path, &existing)
    }

    fn scope_snapshot(
        &self,
        profile: &str,
        query: i64,
    ) -> Result<Option<ScopeSnapshot>, StoreError> {
        self.existing_profile_dir(profile)?;
        Self::read_doc(&self.query_dir(profile, query).join(SCOPE_DOC))
    }

    fn save_scope_snapshot(
        &self,
        profile: &str,
        query: i64,
        snapshot: &ScopeSnapshot,
    ) -> Result<(), StoreError> {
        let dir = self.existing_query_dir(profile, query)?;
        Self::write_doc(&dir.join(SCOPE_DOC), snapshot)
    }

    fn metric_points(
        &self,
        profile: &str,
        query: i64,
        filter: &MetricFilter,
    ) -> Result<Vec<MetricDataPoint>, StoreError> {
        self.existing_profile_dir(profile)?;
        let path = self.query_dir(profile, query).join(METRICS_DOC);

        let mut points: Vec<MetricDataPoint> = Self::read_collection(&path)?
            .into_iter()
            .filter(|p: &MetricDataPoint| filter.metric.as_ref().is_none_or(|m| &p.metric == m))
            .filter(|p| filter.from_bucket.as_ref().is_none_or(|b| &p.bucket >= b))
            .filter(|p| filter.to_bucket.as_ref().is_none_or(|b| &p.bucket <= b))
            .collect();

        points.sort_by(|a, b| (&a.bucket, &a.metric).cmp(&(&b.bucket, &b.metric)));
        Ok(points)
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
        let dir = self.existing_query_dir(profile, query)?;
        let path = dir.join(METRICS_DOC);

        let mut existing: Vec<MetricDataPoint> = Self::read_collection(&path)?;
        for point in points {
            match existing
                .iter_mut()
                .find(|p| p.bucket == point.bucket && p.metric == point.metric)
            {
                Some(slot) => *slot = point.clone(),
                None => existing.push(point.clone()),
            }
        }
        Self::write_doc(&path, &existing)
    }

    fn task_progress(&self, task_id: &str) -> Result<Option<TaskProgress>, StoreError> {
        Ok(self.task_progress_map()?.get(task_id).cloned())
    }

    fn save_task_progress(&self, progress: &TaskProgress) -> Result<(), StoreError> {
        let mut map = self.task_progress_map()?;
        map.insert(progress.task_id.clone(), progress.clone());
        Self::write_doc(&self.root.join(TASK_PROGRESS_DOC), &map)
    }

    fn clear_task_progress(&self) -> Result<(), StoreError> {
        let path = self.root.join(TASK_PROGRESS_DOC);
        if path.exists() {
            std::fs::remove_file(path).map_err(StoreError::Io)?;
        }
        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut swept = 0;

        for (_, _, dir) in self.all_query_dirs()? {
            let records_path = dir.join(RECORDS_DOC);
            let records: Vec<CachedRecord> = Self::read_collection(&records_path)?;
            let (kept, removed): (Vec<CachedRecord>, Vec<CachedRecord>) =
                records.into_iter().partition(|r| !r.is_expired(now));
            let removed_keys: BTreeSet<String> = removed.into_iter().map(|r| r.key).collect();
            if !removed_keys.is_empty() {
                swept += removed_keys.len();
                Self::write_doc(&records_path, &kept)?;
            }

            // Events go when their own expiry lapses or their record did
            let changes_path = dir.join(CHANGES_DOC);
            let events: Vec<ChangeEvent> = Self::read_collection(&changes_path)?;
            let kept: Vec<ChangeEvent> = events
                .iter()
                .filter(|e| e.expires_at > now && !removed_keys.contains(&e.record_key))
                .cloned()
                .collect();
            if kept.len() != events.len() {
                swept += events.len() - kept.len();
                Self::write_doc(&changes_path, &kept)?;
            }
        }

        Ok(swept)
    }

    fn invalidate_cache(&self, profile: &str, query: i64) -> Result<(), StoreError> {
        self.existing_profile_dir(profile)?;
        let dir = self.query_dir(profile, query);
        for doc in [RECORDS_DOC, CHANGES_DOC] {
            let path = dir.join(doc);
            if path.exists() {
                std::fs::remove_file(path).map_err(StoreError::Io)?;
            }
        }
        Ok(())
    }

    fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
        let mut counts = EntityCounts {
            profiles: self.list_profiles()?.len(),
            ..EntityCounts::default()
        };

        for (_, _, dir) in self.all_query_dirs()? {
            counts.queries += 1;
            counts.cached_records +=
                Self::read_collection::<CachedRecord>(&dir.join(RECORDS_DOC))?.len();
            counts.change_events +=
                Self::read_collection::<ChangeEvent>(&dir.join(CHANGES_DOC))?.len();
            counts.statistics_points +=
                Self::read_collection::<StatisticsPoint>(&dir.join(STATISTICS_DOC))?.len();
            counts.metric_points +=
                Self::read_collection::<MetricDataPoint>(&dir.join(METRICS_DOC))?.len();
            if dir.join(SCOPE_DOC).exists() {
                counts.scope_snapshots += 1;
            }
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, FlatFileStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FlatFileStore::with_root(temp_dir.path().join("profiles"));
        (temp_dir, store)
    }

    fn sample_record(key: &str, now: DateTime<Utc>) -> CachedRecord {
        CachedRecord {
            key: key.to_string(),
            status: "Open".to_string(),
            assignee: None,
            record_type: "Bug".to_string(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            fetched_at: now,
            expires_at: now + Duration::hours(24),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(FlatFileStore::sanitize_name("Team Alpha"), "Team_Alpha");
        assert_eq!(FlatFileStore::sanitize_name("Team/Alpha"), "Team_Alpha");
        assert_eq!(FlatFileStore::sanitize_name("team-42"), "team-42");
    }

    #[test]
    fn test_profile_round_trip() {
        let (_dir, store) = open_store();

        let profile = Profile::new("Team Alpha");
        store.save_profile(&profile).unwrap();

        let loaded = store.get_profile("Team Alpha").unwrap().unwrap();
        assert_eq!(loaded, profile);
        assert_eq!(store.list_profiles().unwrap().len(), 1);

        assert!(store.delete_profile("Team Alpha").unwrap());
        assert!(!store.delete_profile("Team Alpha").unwrap());
    }

    #[test]
    fn test_query_name_clash() {
        let (_dir, store) = open_store();
        store.save_profile(&Profile::new("A")).unwrap();

        store.save_query("A", &Query::new(1, "Bugs", "f")).unwrap();
        let clash = store.save_query("A", &Query::new(2, "Bugs", "f"));
        assert!(matches!(clash, Err(StoreError::ConstraintViolation(_))));
    }

    #[test]
    fn test_record_upsert_merges() {
        let (_dir, store) = open_store();
        store.save_profile(&Profile::new("A")).unwrap();
        store.save_query("A", &Query::new(1, "Bugs", "f")).unwrap();
        let now = Utc::now();

        store
            .save_cached_records("A", 1, &[sample_record("PROJ-1", now)])
            .unwrap();
        let mut updated = sample_record("PROJ-1", now);
        updated.status = "Done".to_string();
        store
            .save_cached_records("A", 1, &[updated, sample_record("PROJ-2", now)])
            .unwrap();

        let records = store
            .cached_records("A", 1, &RecordFilter::default())
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, "Done");
    }

    #[test]
    fn test_expired_records_hidden() {
        let (_dir, store) = open_store();
        store.save_profile(&Profile::new("A")).unwrap();
        store.save_query("A", &Query::new(1, "Bugs", "f")).unwrap();
        let now = Utc::now();

        let mut lapsed = sample_record("PROJ-1", now);
        lapsed.expires_at = now - Duration::seconds(1);
        store.save_cached_records("A", 1, &[lapsed]).unwrap();

        let visible = store
            .cached_records("A", 1, &RecordFilter::default().as_of(now))
            .unwrap();
        assert!(visible.is_empty());

        assert_eq!(store.sweep_expired(now).unwrap(), 1);
        assert_eq!(store.sweep_expired(now).unwrap(), 0);
    }

    #[test]
    fn test_save_records_for_unknown_query() {
        let (_dir, store) = open_store();
        store.save_profile(&Profile::new("A")).unwrap();

        let result = store.save_cached_records("A", 9, &[sample_record("X-1", Utc::now())]);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_entity_counts() {
        let (_dir, store) = open_store();
        store.save_profile(&Profile::new("A")).unwrap();
        store.save_query("A", &Query::new(1, "Bugs", "f")).unwrap();
        let now = Utc::now();
        store
            .save_cached_records(
                "A",
                1,
                &[sample_record("PROJ-1", now), sample_record("PROJ-2", now)],
            )
            .unwrap();

        let counts = store.entity_counts().unwrap();
        assert_eq!(counts.profiles, 1);
        assert_eq!(counts.queries, 1);
        assert_eq!(counts.cached_records, 2);
    }

    #[test]
    fn test_app_state_and_task_progress() {
        let (_dir, store) = open_store();

        store.set_state("active_profile", "A").unwrap();
        assert_eq!(store.get_state("active_profile").unwrap().as_deref(), Some("A"));

        store
            .save_task_progress(&TaskProgress {
                task_id: "fetch".to_string(),
                label: "Fetching".to_string(),
                current: 1,
                total: 2,
                updated_at: Utc::now(),
            })
            .unwrap();
        store.clear_task_progress().unwrap();
        assert!(store.task_progress("fetch").unwrap().is_none());
    }

    #[test]
    fn test_reads_for_unknown_profile() {
        let (_dir, store) = open_store();

        assert!(matches!(
            store.get_query("ghost", 1),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.list_queries("ghost"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.cached_records("ghost", 1, &RecordFilter::default()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.scope_snapshot("ghost", 1),
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
    fn test_sweep_takes_events_of_expired_records() {
        let (_dir, store) = open_store();
        store.save_profile(&Profile::new("A")).unwrap();
        store.save_query("A", &Query::new(1, "Bugs", "f")).unwrap();
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
                    // Outlives its record, removed with it anyway
                    expires_at: now + Duration::hours(1),
                }],
            )
            .unwrap();

        assert_eq!(store.sweep_expired(now).unwrap(), 2);
        assert_eq!(store.sweep_expired(now).unwrap(), 0);
        assert!(store
            .change_events("A", 1, &EventFilter::default())
            .unwrap()
            .is_empty());
    }
}
