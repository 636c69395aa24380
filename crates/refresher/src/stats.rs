//! Per-run counters and the JSON run report.

use std::collections::BTreeMap;

use intelcache_core::{FailureKind, ServiceKind};
use serde::Serialize;

/// Which operation produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Seed,
    Refresh,
}

/// What happened to one candidate indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Fetched and upserted.
    Updated,
    /// Still within its TTL.
    Fresh,
    /// Not in the state this phase handles (a stale row during seeding).
    Deferred,
    /// Another worker holds the in-flight claim.
    Duplicate,
    /// No adapter configured for the service.
    Unconfigured,
    /// Abandoned on cancellation; nothing written.
    Cancelled,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub succeeded: u64,
    pub failed: u64,
}

/// Summary of one or more refresh phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub seeded: u64,
    pub refreshed: u64,
    /// Lookups avoided because the cached record was fresh.
    pub fresh_skipped: u64,
    pub deferred: u64,
    pub duplicates_skipped: u64,
    pub unconfigured_skipped: u64,
    pub cancelled: u64,
    /// Attempts beyond the first, across all indicators.
    pub retries: u64,
    pub errors: BTreeMap<FailureKind, u64>,
    pub services: BTreeMap<ServiceKind, ServiceStats>,
}

impl RunReport {
    pub fn record(&mut self, phase: Phase, service: ServiceKind, outcome: Outcome) {
        match outcome {
            Outcome::Updated => {
                match phase {
                    Phase::Seed => self.seeded += 1,
                    Phase::Refresh => self.refreshed += 1,
                }
                self.services.entry(service).or_default().succeeded += 1;
            }
            Outcome::Fresh => self.fresh_skipped += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Duplicate => self.duplicates_skipped += 1,
            Outcome::Unconfigured => self.unconfigured_skipped += 1,
            Outcome::Cancelled => self.cancelled += 1,
            Outcome::Failed(kind) => {
                *self.errors.entry(kind).or_default() += 1;
                self.services.entry(service).or_default().failed += 1;
            }
        }
    }

    pub fn record_attempts(&mut self, attempts: u32) {
        self.retries += u64::from(attempts.saturating_sub(1));
    }

    pub fn merge(&mut self, other: RunReport) {
        self.seeded += other.seeded;
        self.refreshed += other.refreshed;
        self.fresh_skipped += other.fresh_skipped;
        self.deferred += other.deferred;
        self.duplicates_skipped += other.duplicates_skipped;
        self.unconfigured_skipped += other.unconfigured_skipped;
        self.cancelled += other.cancelled;
        self.retries += other.retries;
        for (kind, n) in other.errors {
            *self.errors.entry(kind).or_default() += n;
        }
        for (service, stats) in other.services {
            let entry = self.services.entry(service).or_default();
            entry.succeeded += stats.succeeded;
            entry.failed += stats.failed;
        }
    }

    pub fn failures(&self) -> u64 {
        self.errors.values().sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failures() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_merge() {
        let mut a = RunReport::default();
        a.record(Phase::Seed, ServiceKind::IpOrg, Outcome::Updated);
        a.record(Phase::Seed, ServiceKind::IpOrg, Outcome::Failed(FailureKind::ClientError));
        a.record_attempts(3);

        let mut b = RunReport::default();
        b.record(Phase::Refresh, ServiceKind::IpOrg, Outcome::Updated);
        b.record(Phase::Refresh, ServiceKind::HashReputation, Outcome::Fresh);
        b.record(Phase::Refresh, ServiceKind::HashReputation, Outcome::Duplicate);

        a.merge(b);

        assert_eq!(a.seeded, 1);
        assert_eq!(a.refreshed, 1);
        assert_eq!(a.fresh_skipped, 1);
        assert_eq!(a.duplicates_skipped, 1);
        assert_eq!(a.retries, 2);
        assert_eq!(a.failures(), 1);
        assert_eq!(a.services[&ServiceKind::IpOrg], ServiceStats { succeeded: 2, failed: 1 });
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = RunReport::default();
        report.record(Phase::Seed, ServiceKind::HostReputation, Outcome::Failed(FailureKind::RateLimitExceeded));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["errors"]["rate_limit_exceeded"], 1);
        assert_eq!(json["services"]["host_reputation"]["failed"], 1);
        assert!(report.has_failures());
    }
}
