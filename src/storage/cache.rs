//! Expiration policy for cached tracker data.
//!
//! Every cached record carries an expiration timestamp set at write time
//! (24 hours from fetch by default). Reads enforce expiry by predicate
//! rather than a background trigger, and a separate sweep deletes lapsed
//! rows. Invalidation on field-mapping change is explicit and handled by
//! [`save_profile`](super::StoreBackend::save_profile).

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::StoreError;
use crate::model::{CachedRecord, ChangeEvent, RecordFilter};

use super::StoreBackend;

/// Default time-to-live for cached records, in hours.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Expiry instant for data fetched at `fetched_at` under the default
/// policy.
#[must_use]
pub fn default_expiry(fetched_at: DateTime<Utc>) -> DateTime<Utc> {
    fetched_at + Duration::hours(DEFAULT_TTL_HOURS)
}

/// TTL-aware facade over a storage backend.
///
/// Stamps batches with a consistent fetch/expiry instant before writing
/// and exposes the sweep operation.
pub struct CacheManager<B: StoreBackend> {
    store: B,
}

impl<B: StoreBackend> CacheManager<B> {
    /// Wrap a backend.
    pub fn new(store: B) -> Self {
        Self { store }
    }

    /// The wrapped backend.
    pub fn store(&self) -> &B {
        &self.store
    }

    /// Stamp and upsert a freshly fetched batch of records and their
    /// change events for a query.
    ///
    /// All rows in the batch share one fetch instant and one expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if either batch write fails; neither batch is
    /// partially visible.
    pub fn refresh(
        &self,
        profile: &str,
        query: i64,
        mut records: Vec<CachedRecord>,
        mut events: Vec<ChangeEvent>,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let expires_at = default_expiry(fetched_at);
        for record in &mut records {
            record.fetched_at = fetched_at;
            record.expires_at = expires_at;
        }
        for event in &mut events {
            event.expires_at = expires_at;
        }

        self.store.save_cached_records(profile, query, &records)?;
        self.store.save_change_events(profile, query, &events)?;
        info!(
            profile,
            query,
            records = records.len(),
            events = events.len(),
            "cache refreshed"
        );
        Ok(())
    }

    /// Read records that have not yet expired as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn fresh_records(
        &self,
        profile: &str,
        query: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<CachedRecord>, StoreError> {
        self.store
            .cached_records(profile, query, &RecordFilter::default().as_of(now))
    }

    /// Delete rows whose expiration has passed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let swept = self.store.sweep_expired(now)?;
        if swept > 0 {
            info!(swept, "cache sweep removed expired rows");
        }
        Ok(swept)
    }
}
