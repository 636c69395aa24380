//! Range checks applied to a merged `AppConfig`.

use crate::config::AppConfig;
use crate::staleness::MAX_TTL_SECS;
use thiserror::Error;

/// Why a configuration could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// # Errors
    ///
    /// `ConfigError::Invalid` names the first offending field when:
    /// - `request_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_attempts` is 0 or exceeds 10
    /// - `base_backoff_ms` or `jitter_ms` exceeds 1 minute
    /// - `worker_count` is 0 or exceeds 32
    /// - `user_agent` is empty
    /// - any rate limit has zero calls or a zero window
    /// - any TTL is zero or longer than `MAX_TTL_SECS`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms < 100 {
            return Err(invalid("request_timeout_ms", "must be at least 100ms"));
        }
        if self.request_timeout_ms > 300_000 {
            return Err(invalid("request_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(invalid("max_attempts", "must be between 1 and 10"));
        }

        if self.base_backoff_ms > 60_000 {
            return Err(invalid("base_backoff_ms", "must not exceed 1 minute (60000ms)"));
        }
        if self.jitter_ms > 60_000 {
            return Err(invalid("jitter_ms", "must not exceed 1 minute (60000ms)"));
        }

        if self.worker_count == 0 || self.worker_count > 32 {
            return Err(invalid("worker_count", "must be between 1 and 32"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        for (service, limit) in &self.rate_limits {
            if limit.max_calls == 0 {
                return Err(invalid(format!("rate_limits.{service}.max_calls"), "must be greater than 0"));
            }
            if limit.window_ms == 0 {
                return Err(invalid(format!("rate_limits.{service}.window_ms"), "must be greater than 0"));
            }
        }

        for (service, policy) in &self.ttl {
            if policy.ttl_secs == 0 {
                return Err(invalid(format!("ttl.{service}.ttl_secs"), "must be greater than 0"));
            }
            if policy.ttl_secs > MAX_TTL_SECS {
                return Err(invalid(format!("ttl.{service}.ttl_secs"), "must not exceed 100 years; pin verdicts instead"));
            }
        }

        Ok(())
    }
}
