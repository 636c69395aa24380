//! Indicator cache rows.
//!
//! One row per `(service, key)`. Successful fetches replace the payload and
//! advance `last_refreshed_at`; failed attempts only touch the attempt
//! bookkeeping, so a failure never regresses a previously good refresh.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use crate::staleness::TtlPolicy;
use crate::{Error, Indicator, ServiceKind};

/// Failure categories recorded against an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, connection reset/refused, 5xx.
    TransientNetwork,
    /// Provider answered 429.
    RateLimitExceeded,
    /// 4xx other than 429, malformed key, missing credentials.
    ClientError,
    /// Response body did not match the expected shape.
    ParseError,
    /// The cache write itself failed.
    Persistence,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::RateLimitExceeded => "rate_limit_exceeded",
            FailureKind::ClientError => "client_error",
            FailureKind::ParseError => "parse_error",
            FailureKind::Persistence => "persistence",
        }
    }
}

/// Descriptor of the most recent failed attempt, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: FailureKind,
    pub message: String,
}

impl LastError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// A cached lookup for one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub service: ServiceKind,
    pub key: String,
    /// Parsed response payload; `None` until the first successful fetch.
    pub payload: Option<serde_json::Value>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: DateTime<Utc>,
    pub last_error: Option<LastError>,
    /// Failed attempts since the last success.
    pub consecutive_failures: u32,
}

/// A stored row that could not be decoded.
#[derive(Debug)]
pub struct UndecodableRow {
    pub service: ServiceKind,
    pub key: String,
    pub error: Error,
}

/// One row of a listing. Each row decodes on its own, so a corrupt row is
/// reported without hiding the rows around it.
pub type ListedRecord = Result<CacheRecord, UndecodableRow>;

/// Row counts for one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub total: u64,
    /// Rows with a payload.
    pub populated: u64,
    /// Rows whose latest attempt failed.
    pub failing: u64,
}

const SELECT_COLUMNS: &str = "SELECT service, key, payload, last_refreshed_at, last_attempt_at, last_error, \
                              consecutive_failures FROM indicator_cache";

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidRecord(format!("{column}: {e}")))
}

/// Raw column values, decoded outside the rusqlite row callback so decode
/// failures surface as `Error::InvalidRecord`.
struct RawRow {
    service: String,
    key: String,
    payload: Option<String>,
    last_refreshed_at: Option<String>,
    last_attempt_at: String,
    last_error: Option<String>,
    consecutive_failures: i64,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            service: row.get(0)?,
            key: row.get(1)?,
            payload: row.get(2)?,
            last_refreshed_at: row.get(3)?,
            last_attempt_at: row.get(4)?,
            last_error: row.get(5)?,
            consecutive_failures: row.get(6)?,
        })
    }

    fn decode(self) -> Result<CacheRecord, Error> {
        let service = self
            .service
            .parse::<ServiceKind>()
            .map_err(|e| Error::InvalidRecord(e.to_string()))?;
        let payload = self
            .payload
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .map_err(|e| Error::InvalidRecord(format!("payload: {e}")))?;
        let last_refreshed_at = self
            .last_refreshed_at
            .as_deref()
            .map(|raw| parse_ts("last_refreshed_at", raw))
            .transpose()?;
        let last_attempt_at = parse_ts("last_attempt_at", &self.last_attempt_at)?;
        let last_error = self
            .last_error
            .map(|e| serde_json::from_str(&e))
            .transpose()
            .map_err(|e| Error::InvalidRecord(format!("last_error: {e}")))?;

        Ok(CacheRecord {
            service,
            key: self.key,
            payload,
            last_refreshed_at,
            last_attempt_at,
            last_error,
            consecutive_failures: u32::try_from(self.consecutive_failures).unwrap_or(u32::MAX),
        })
    }
}

impl CacheDb {
    /// Get the record for `(service, key)`.
    ///
    /// Returns None if no attempt was ever recorded for the indicator.
    pub async fn get_record(&self, service: ServiceKind, key: &str) -> Result<Option<CacheRecord>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheRecord>, Error> {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE service = ?1 AND key = ?2"))?;

                match stmt.query_row(params![service.as_str(), key], RawRow::from_row) {
                    Ok(raw) => raw.decode().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Store a successful fetch.
    ///
    /// Uses UPSERT semantics keyed on `(service, key)`: the payload is replaced
    /// whole, the error descriptor cleared and the failure streak reset.
    pub async fn upsert_record(
        &self, service: ServiceKind, key: &str, payload: &serde_json::Value, refreshed_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let key = key.to_string();
        let payload = payload.to_string();
        let refreshed_at = format_ts(refreshed_at);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO indicator_cache (
                        service, key, payload, last_refreshed_at, last_attempt_at, last_error, consecutive_failures
                    ) VALUES (?1, ?2, ?3, ?4, ?4, NULL, 0)
                    ON CONFLICT(service, key) DO UPDATE SET
                        payload = excluded.payload,
                        last_refreshed_at = excluded.last_refreshed_at,
                        last_attempt_at = excluded.last_attempt_at,
                        last_error = NULL,
                        consecutive_failures = 0",
                    params![service.as_str(), key, payload, refreshed_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Record a failed attempt.
    ///
    /// Creates a payload-less row for indicators never fetched successfully;
    /// otherwise only `last_attempt_at`, `last_error` and the failure streak
    /// change.
    pub async fn record_failure(
        &self, service: ServiceKind, key: &str, error: &LastError, attempted_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let key = key.to_string();
        let error_json =
            serde_json::to_string(error).map_err(|e| Error::InvalidInput(format!("unencodable error: {e}")))?;
        let attempted_at = format_ts(attempted_at);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO indicator_cache (
                        service, key, payload, last_refreshed_at, last_attempt_at, last_error, consecutive_failures
                    ) VALUES (?1, ?2, NULL, NULL, ?3, ?4, 1)
                    ON CONFLICT(service, key) DO UPDATE SET
                        last_attempt_at = excluded.last_attempt_at,
                        last_error = excluded.last_error,
                        consecutive_failures = indicator_cache.consecutive_failures + 1",
                    params![service.as_str(), key, attempted_at, error_json],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// List stored records, optionally restricted to one service.
    ///
    /// Ordered by service then key.
    pub async fn list_records(&self, service: Option<ServiceKind>) -> Result<Vec<CacheRecord>, Error> {
        let service = service.map(ServiceKind::as_str);
        self.conn
            .call(move |conn| -> Result<Vec<CacheRecord>, Error> {
                let mut stmt =
                    conn.prepare(&format!("{SELECT_COLUMNS} WHERE ?1 IS NULL OR service = ?1 ORDER BY service, key"))?;
                let rows = stmt
                    .query_map(params![service], RawRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RawRow::decode).collect()
            })
            .await
            .map_err(Error::from)
    }

    /// Keys of `service` rows that have no payload yet (earlier failures).
    pub async fn list_missing_keys(&self, service: ServiceKind) -> Result<Vec<Indicator>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<Indicator>, Error> {
                let mut stmt =
                    conn.prepare("SELECT key FROM indicator_cache WHERE service = ?1 AND payload IS NULL ORDER BY key")?;
                let keys = stmt
                    .query_map(params![service.as_str()], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys.into_iter().map(|key| Indicator::new(service, key)).collect())
            })
            .await
            .map_err(Error::from)
    }

    /// Populated `service` rows whose TTL under `policy` has elapsed at `now`,
    /// plus populated rows with no refresh time.
    ///
    /// The cutoff is compared against the stored RFC 3339 text, so a row is
    /// selected on its raw timestamp and decoded afterwards. Pinned verdicts
    /// are not filtered here; callers still `classify` each record.
    pub async fn list_stale_records(
        &self, service: ServiceKind, policy: &TtlPolicy, now: DateTime<Utc>,
    ) -> Result<Vec<ListedRecord>, Error> {
        let cutoff = policy.stale_cutoff(now).map(format_ts);
        self.conn
            .call(move |conn| -> Result<Vec<ListedRecord>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COLUMNS} WHERE service = ?1 AND payload IS NOT NULL \
                     AND (last_refreshed_at IS NULL OR last_refreshed_at <= ?2) ORDER BY key"
                ))?;
                let rows = stmt
                    .query_map(params![service.as_str(), cutoff], RawRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows
                    .into_iter()
                    .map(|raw| {
                        let key = raw.key.clone();
                        raw.decode().map_err(|error| UndecodableRow { service, key, error })
                    })
                    .collect())
            })
            .await
            .map_err(Error::from)
    }

    /// Number of `service` rows holding a payload.
    pub async fn count_populated(&self, service: ServiceKind) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM indicator_cache WHERE service = ?1 AND payload IS NOT NULL",
                    params![service.as_str()],
                    |row| row.get(0),
                )?;
                Ok(u64::try_from(count).unwrap_or(0))
            })
            .await
            .map_err(Error::from)
    }

    /// Row counts per service, for status reporting.
    pub async fn count_records(&self) -> Result<BTreeMap<ServiceKind, RecordCounts>, Error> {
        self.conn
            .call(|conn| -> Result<BTreeMap<ServiceKind, RecordCounts>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT service, COUNT(*), COUNT(payload), SUM(CASE WHEN last_error IS NULL THEN 0 ELSE 1 END)
                     FROM indicator_cache GROUP BY service",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut counts = BTreeMap::new();
                for (service, total, populated, failing) in rows {
                    let service = service
                        .parse::<ServiceKind>()
                        .map_err(|e| Error::InvalidRecord(e.to_string()))?;
                    counts.insert(
                        service,
                        RecordCounts { total: total as u64, populated: populated as u64, failing: failing as u64 },
                    );
                }
                Ok(counts)
            })
            .await
            .map_err(Error::from)
    }
}
