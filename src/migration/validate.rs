//! Post-transform validation.
//!
//! The transform is only trusted if the destination holds exactly as
//! many rows of each entity type as the source. Anything else aborts
//! the migration before commit.

use crate::error::StoreError;
use crate::model::EntityCounts;

/// Compare per-entity row counts between source and destination.
///
/// # Errors
///
/// Returns `MigrationFailed` naming every mismatched entity type.
pub fn check(source: &EntityCounts, dest: &EntityCounts) -> Result<(), StoreError> {
    let mismatches = mismatches(source, dest);
    if mismatches.is_empty() {
        return Ok(());
    }

    Err(StoreError::MigrationFailed(format!(
        "row count mismatch after transform: {}",
        mismatches.join(", ")
    )))
}

fn mismatches(source: &EntityCounts, dest: &EntityCounts) -> Vec<String> {
    let pairs = [
        ("profiles", source.profiles, dest.profiles),
        ("queries", source.queries, dest.queries),
        ("cached_records", source.cached_records, dest.cached_records),
        ("change_events", source.change_events, dest.change_events),
        (
            "statistics_points",
            source.statistics_points,
            dest.statistics_points,
        ),
        (
            "scope_snapshots",
            source.scope_snapshots,
            dest.scope_snapshots,
        ),
        ("metric_points", source.metric_points, dest.metric_points),
    ];

    pairs
        .iter()
        .filter(|(_, src, dst)| src != dst)
        .map(|(entity, src, dst)| format!("{entity} {src} -> {dst}"))
        .collect()
}
