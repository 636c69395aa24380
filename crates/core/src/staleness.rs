//! Staleness policy: decides whether a cached lookup must be fetched again.

use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheRecord;
use crate::ServiceKind;

/// Result of classifying a cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    /// No record, or no successful fetch yet.
    Missing,
    Fresh,
    Stale,
}

/// Cached verdicts that stay fresh regardless of age.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPin {
    #[default]
    None,
    /// Only `"malicious"`.
    Malicious,
    /// Anything but `"unknown"`. A payload without a verdict is unknown.
    Known,
}

impl VerdictPin {
    fn holds(self, payload: &serde_json::Value) -> bool {
        let verdict = payload.get("verdict").and_then(|v| v.as_str()).unwrap_or("unknown");
        match self {
            VerdictPin::None => false,
            VerdictPin::Malicious => verdict == "malicious",
            VerdictPin::Known => verdict != "unknown",
        }
    }
}

/// Per-service TTL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// Age at which a record becomes stale.
    pub ttl_secs: u64,

    #[serde(default)]
    pub pin: VerdictPin,
}

const DAY: u64 = 86_400;

/// Largest accepted `ttl_secs` (100 years). Pin verdicts rather than
/// configuring a TTL that never elapses.
pub const MAX_TTL_SECS: u64 = 100 * 365 * DAY;

impl TtlPolicy {
    pub const fn new(ttl_secs: u64) -> Self {
        Self { ttl_secs, pin: VerdictPin::None }
    }

    pub const fn pinned(ttl_secs: u64, pin: VerdictPin) -> Self {
        Self { ttl_secs, pin }
    }

    /// The TTL as a duration, saturating at `TimeDelta::MAX`.
    pub fn ttl(&self) -> Duration {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Records refreshed at or before this instant are past their TTL.
    /// `None` when the TTL reaches back before the representable range.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.ttl())
    }
}

/// Built-in TTL for a service.
///
/// A hash with a known verdict is pinned; only `"unknown"` hashes are
/// re-checked, monthly, to catch newly flagged samples. IP reputation churns
/// quickly.
pub fn default_ttl(service: ServiceKind) -> TtlPolicy {
    match service {
        ServiceKind::HashReputation => TtlPolicy::pinned(30 * DAY, VerdictPin::Known),
        ServiceKind::IpReputation => TtlPolicy::new(7 * DAY),
        ServiceKind::HostReputation => TtlPolicy::new(7 * DAY),
        ServiceKind::IpOrg => TtlPolicy::new(30 * DAY),
    }
}

/// Classify a record against a policy at `now`.
///
/// The TTL boundary is inclusive: a record exactly `ttl` old is `Stale`.
pub fn classify(record: Option<&CacheRecord>, policy: &TtlPolicy, now: DateTime<Utc>) -> Staleness {
    let Some(record) = record else {
        return Staleness::Missing;
    };
    let Some(payload) = &record.payload else {
        return Staleness::Missing;
    };

    if policy.pin.holds(payload) {
        return Staleness::Fresh;
    }

    match record.last_refreshed_at {
        Some(refreshed_at) if now - refreshed_at < policy.ttl() => Staleness::Fresh,
        _ => Staleness::Stale,
    }
}
