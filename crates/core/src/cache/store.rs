//! The store contract the refresher persists through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::connection::CacheDb;
use super::records::{CacheRecord, LastError, ListedRecord};
use crate::staleness::TtlPolicy;
use crate::{Error, Indicator, ServiceKind};

/// Durable `(service, key)` → record table.
///
/// Implementations must apply each write atomically: an upsert replaces the
/// whole payload, and writes for the same key never interleave.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, service: ServiceKind, key: &str) -> Result<Option<CacheRecord>, Error>;

    async fn upsert(
        &self, service: ServiceKind, key: &str, payload: &serde_json::Value, refreshed_at: DateTime<Utc>,
    ) -> Result<(), Error>;

    async fn record_failure(
        &self, service: ServiceKind, key: &str, error: &LastError, attempted_at: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Payload-less rows of `service`.
    async fn list_missing(&self, service: ServiceKind) -> Result<Vec<Indicator>, Error>;

    /// Populated rows of `service` whose TTL may have elapsed at `now`. A row
    /// that fails to decode is returned as its own `Err` entry.
    async fn list_stale(
        &self, service: ServiceKind, policy: &TtlPolicy, now: DateTime<Utc>,
    ) -> Result<Vec<ListedRecord>, Error>;

    async fn count_populated(&self, service: ServiceKind) -> Result<u64, Error>;
}

#[async_trait]
impl CacheStore for CacheDb {
    async fn get(&self, service: ServiceKind, key: &str) -> Result<Option<CacheRecord>, Error> {
        self.get_record(service, key).await
    }

    async fn upsert(
        &self, service: ServiceKind, key: &str, payload: &serde_json::Value, refreshed_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.upsert_record(service, key, payload, refreshed_at).await
    }

    async fn record_failure(
        &self, service: ServiceKind, key: &str, error: &LastError, attempted_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        CacheDb::record_failure(self, service, key, error, attempted_at).await
    }

    async fn list_missing(&self, service: ServiceKind) -> Result<Vec<Indicator>, Error> {
        self.list_missing_keys(service).await
    }

    async fn list_stale(
        &self, service: ServiceKind, policy: &TtlPolicy, now: DateTime<Utc>,
    ) -> Result<Vec<ListedRecord>, Error> {
        self.list_stale_records(service, policy, now).await
    }

    async fn count_populated(&self, service: ServiceKind) -> Result<u64, Error> {
        CacheDb::count_populated(self, service).await
    }
}
