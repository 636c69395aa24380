//! Refresh orchestration.
//!
//! Candidates for a phase are queued and drained by a fixed pool of workers.
//! Each indicator goes through the same pipeline: in-flight claim, staleness
//! re-check, rate-limited and retried fetch, then exactly one cache write
//! (`upsert` on success, `record_failure` otherwise). A failure for one
//! indicator never stops the others.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use intelcache_client::{
    AdapterSet, Cancellation, FetchError, HttpTransport, RateLimiters, RetryExecutor, RetryPolicy, fetch_once,
};
use intelcache_core::{AppConfig, CacheStore, FailureKind, Indicator, LastError, ServiceKind, Staleness, TtlPolicy, classify};
use tokio::task::JoinSet;

use crate::error::RefreshError;
use crate::inflight::InFlight;
use crate::stats::{Outcome, Phase, RunReport};

/// Drives `seed_missing` and `refresh_stale`. Cheap to clone; clones share
/// limiters and the in-flight set.
#[derive(Clone)]
pub struct Refresher {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CacheStore>,
    adapters: AdapterSet,
    transport: Arc<dyn HttpTransport>,
    limiters: RateLimiters,
    retry: RetryExecutor,
    ttl: BTreeMap<ServiceKind, TtlPolicy>,
    request_timeout: Duration,
    workers: usize,
    inflight: InFlight,
    cancel: Cancellation,
}

impl Refresher {
    pub fn new(
        config: &AppConfig, store: Arc<dyn CacheStore>, adapters: AdapterSet, transport: Arc<dyn HttpTransport>,
        cancel: Cancellation,
    ) -> Self {
        let ttl = ServiceKind::ALL
            .into_iter()
            .map(|s| (s, config.ttl_policy(s)))
            .collect();

        Self {
            inner: Arc::new(Inner {
                store,
                adapters,
                transport,
                limiters: RateLimiters::from_config(config),
                retry: RetryExecutor::new(RetryPolicy::from_config(config)),
                ttl,
                request_timeout: config.request_timeout(),
                workers: config.worker_count.max(1),
                inflight: InFlight::new(),
                cancel,
            }),
        }
    }

    /// Populate every indicator that has no payload yet.
    ///
    /// Candidates are the `source` indicators plus every stored payload-less
    /// row (earlier failures), de-duplicated.
    pub async fn seed_missing(&self, source: &[Indicator]) -> Result<RunReport, RefreshError> {
        let mut retry_rows = Vec::new();
        for service in ServiceKind::ALL {
            retry_rows.extend(self.inner.store.list_missing(service).await?);
        }
        let candidates = dedup(source.iter().cloned().chain(retry_rows));

        tracing::info!(candidates = candidates.len(), "seeding missing indicators");
        let report = self.run_phase(Phase::Seed, candidates).await;
        tracing::info!(seeded = report.seeded, failures = report.failures(), "seed finished");

        Ok(report)
    }

    /// Re-fetch every stored record whose TTL has elapsed.
    ///
    /// Only rows past their cutoff are loaded; the rest are counted as fresh.
    /// A row that cannot be decoded counts as a persistence failure for that
    /// indicator alone.
    pub async fn refresh_stale(&self) -> Result<RunReport, RefreshError> {
        let now = Utc::now();

        let mut report = RunReport::default();
        let mut candidates = Vec::new();
        for service in ServiceKind::ALL {
            let policy = self.inner.ttl_policy(service);
            let listed = self.inner.store.list_stale(service, &policy, now).await?;
            let populated = self.inner.store.count_populated(service).await?;
            report.fresh_skipped += populated.saturating_sub(listed.len() as u64);

            for row in listed {
                let record = match row {
                    Ok(record) => record,
                    Err(bad) => {
                        tracing::error!(%service, key = %bad.key, error = %bad.error, "undecodable cache row");
                        report.record(Phase::Refresh, service, Outcome::Failed(FailureKind::Persistence));
                        continue;
                    }
                };
                match classify(Some(&record), &policy, now) {
                    Staleness::Stale => candidates.push(Indicator::new(service, record.key)),
                    Staleness::Fresh => report.record(Phase::Refresh, service, Outcome::Fresh),
                    Staleness::Missing => {}
                }
            }
        }

        tracing::info!(candidates = candidates.len(), fresh = report.fresh_skipped, "refreshing stale indicators");
        report.merge(self.run_phase(Phase::Refresh, candidates).await);
        tracing::info!(refreshed = report.refreshed, failures = report.failures(), "refresh finished");

        Ok(report)
    }

    async fn run_phase(&self, phase: Phase, candidates: Vec<Indicator>) -> RunReport {
        let queue = Arc::new(Mutex::new(VecDeque::from(candidates)));
        let mut workers = JoinSet::new();

        for worker in 0..self.inner.workers {
            let inner = Arc::clone(&self.inner);
            let queue = Arc::clone(&queue);
            workers.spawn(async move {
                let mut report = RunReport::default();
                while !inner.cancel.is_cancelled() {
                    let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                    let Some(indicator) = next else { break };

                    let (outcome, attempts) = inner.process(phase, &indicator).await;
                    report.record(phase, indicator.service, outcome);
                    report.record_attempts(attempts);
                }
                tracing::debug!(worker, "refresh worker done");
                report
            });
        }

        let mut report = RunReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => tracing::error!(error = %e, "refresh worker failed"),
            }
        }

        let abandoned = queue.lock().unwrap_or_else(|e| e.into_inner()).len() as u64;
        if abandoned > 0 {
            tracing::warn!(abandoned, "run cancelled before all indicators were processed");
            report.cancelled += abandoned;
        }

        report
    }
}

impl Inner {
    fn ttl_policy(&self, service: ServiceKind) -> TtlPolicy {
        self.ttl
            .get(&service)
            .copied()
            .unwrap_or_else(|| intelcache_core::staleness::default_ttl(service))
    }

    /// Run one indicator through the pipeline. Returns the outcome and the
    /// number of fetch attempts made.
    async fn process(&self, phase: Phase, indicator: &Indicator) -> (Outcome, u32) {
        let Indicator { service, key } = indicator;
        let service = *service;

        let Some(adapter) = self.adapters.get(service) else {
            return (Outcome::Unconfigured, 0);
        };
        let Some(_claim) = self.inflight.try_claim(indicator) else {
            tracing::debug!(%indicator, "already in flight");
            return (Outcome::Duplicate, 0);
        };

        let record = match self.store.get(service, key).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(%indicator, error = %e, "cache read failed");
                return (Outcome::Failed(FailureKind::Persistence), 0);
            }
        };
        match (phase, classify(record.as_ref(), &self.ttl_policy(service), Utc::now())) {
            (Phase::Seed, Staleness::Missing) | (Phase::Refresh, Staleness::Stale) => {}
            (_, Staleness::Fresh) => return (Outcome::Fresh, 0),
            _ => return (Outcome::Deferred, 0),
        }

        let adapter = adapter.as_ref();
        let result = self
            .retry
            .run(
                |e: &FetchError| adapter.classify_error(e),
                &self.cancel,
                |_attempt| async move {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = self.limiters.acquire(service) => {}
                    }
                    fetch_once(adapter, self.transport.as_ref(), key, self.request_timeout).await
                },
            )
            .await;

        match result {
            Ok(fetched) => {
                let outcome = match self.store.upsert(service, key, &fetched.value, Utc::now()).await {
                    Ok(()) => {
                        tracing::debug!(%indicator, attempts = fetched.attempts, "indicator updated");
                        Outcome::Updated
                    }
                    Err(e) => {
                        tracing::error!(%indicator, error = %e, "cache write failed");
                        Outcome::Failed(FailureKind::Persistence)
                    }
                };
                (outcome, fetched.attempts)
            }
            Err(failed) => {
                let Some(kind) = failed.error.kind() else {
                    tracing::debug!(%indicator, "abandoned on cancellation");
                    return (Outcome::Cancelled, failed.attempts);
                };
                tracing::warn!(
                    %indicator,
                    kind = kind.as_str(),
                    attempts = failed.attempts,
                    exhausted = failed.exhausted,
                    error = %failed.error,
                    "lookup failed"
                );

                let last_error = LastError::new(kind, failed.error.to_string());
                if let Err(e) = self.store.record_failure(service, key, &last_error, Utc::now()).await {
                    tracing::error!(%indicator, error = %e, "failed to record lookup failure");
                    return (Outcome::Failed(FailureKind::Persistence), failed.attempts);
                }
                (Outcome::Failed(kind), failed.attempts)
            }
        }
    }
}

/// Drop repeats, keeping first-seen order.
fn dedup(indicators: impl IntoIterator<Item = Indicator>) -> Vec<Indicator> {
    let mut seen = HashSet::new();
    indicators
        .into_iter()
        .filter(|i| seen.insert(i.clone()))
        .collect()
}
