//! Per-service call pacing.
//!
//! Each provider gets a sliding-window limiter: at most `max_calls` grants in
//! any window of `window` length. Waiters hold the limiter's lock while they
//! sleep, so grants are handed out in arrival order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use intelcache_core::{AppConfig, RateLimit, ServiceKind};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter for one service.
#[derive(Debug)]
pub struct RateLimiter {
    grants: Mutex<VecDeque<Instant>>,
    max_calls: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        let max_calls = limit.max_calls.max(1) as usize;
        Self { grants: Mutex::new(VecDeque::with_capacity(max_calls)), max_calls, window: limit.window() }
    }

    /// Wait until a call slot is free, then take it.
    ///
    /// Dropping the returned future before it resolves consumes no slot.
    pub async fn acquire(&self) {
        let mut grants = self.grants.lock().await;
        loop {
            let now = Instant::now();
            while grants.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
                grants.pop_front();
            }
            if grants.len() < self.max_calls {
                grants.push_back(now);
                return;
            }
            if let Some(oldest) = grants.front().copied() {
                tokio::time::sleep_until(oldest + self.window).await;
            }
        }
    }
}

/// One limiter per service, shared by every worker.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    limiters: BTreeMap<ServiceKind, Arc<RateLimiter>>,
}

impl RateLimiters {
    pub fn from_config(config: &AppConfig) -> Self {
        let limiters = ServiceKind::ALL
            .iter()
            .map(|&service| (service, Arc::new(RateLimiter::new(config.rate_limit(service)))))
            .collect();
        Self { limiters }
    }

    pub fn limiter(&self, service: ServiceKind) -> Option<Arc<RateLimiter>> {
        self.limiters.get(&service).cloned()
    }

    /// Take a slot for `service`. Services without a limiter pass through.
    pub async fn acquire(&self, service: ServiceKind) {
        if let Some(limiter) = self.limiters.get(&service) {
            limiter.acquire().await;
        }
    }
}
