//! Refresher settings, merged by figment from defaults, an optional TOML
//! file named by `INTELCACHE_CONFIG_FILE`, and `INTELCACHE_*` variables
//! (later sources override earlier ones).
//!
//! Per-service settings are table-driven maps keyed by service name, e.g.
//! `INTELCACHE_RATE_LIMITS__HASH_REPUTATION__MAX_CALLS=4` or
//!
//! ```toml
//! [ttl.ip_reputation]
//! ttl_secs = 604800
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::ServiceKind;
use crate::staleness::{TtlPolicy, default_ttl};

mod validation;

pub use validation::ConfigError;

/// Call budget for one provider: at most `max_calls` per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window_ms: u64,
}

impl RateLimit {
    pub const fn new(max_calls: u32, window_ms: u64) -> Self {
        Self { max_calls, window_ms }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Built-in call budget for a service.
///
/// VirusTotal's public tier allows 4 lookups a minute; the others are paced
/// well under their documented daily quotas.
pub fn default_rate_limit(service: ServiceKind) -> RateLimit {
    match service {
        ServiceKind::HashReputation => RateLimit::new(4, 60_000),
        ServiceKind::IpReputation => RateLimit::new(1, 1_600),
        ServiceKind::HostReputation => RateLimit::new(1, 1_000),
        ServiceKind::IpOrg => RateLimit::new(5, 1_000),
    }
}

/// Everything a refresh run needs besides the indicator list itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite file holding the indicator cache (`INTELCACHE_DB_PATH`).
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// File of `service key` lines to seed from; stdin when unset.
    ///
    /// Set via INTELCACHE_INDICATORS_PATH environment variable.
    #[serde(default)]
    pub indicators_path: Option<PathBuf>,

    /// Sent on every provider request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Attempts per indicator per run, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential backoff between attempts, in milliseconds.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound (exclusive) of the uniform jitter added to each backoff.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Number of concurrent refresh workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_rate_limits")]
    pub rate_limits: BTreeMap<ServiceKind, RateLimit>,

    #[serde(default = "default_ttls")]
    pub ttl: BTreeMap<ServiceKind, TtlPolicy>,

    /// Provider API keys. Services without a key are skipped.
    ///
    /// Set via INTELCACHE_API_KEYS__<SERVICE> environment variables.
    #[serde(default)]
    pub api_keys: BTreeMap<ServiceKind, String>,

    /// Base URL overrides, mostly for pointing at test doubles.
    #[serde(default)]
    pub base_urls: BTreeMap<ServiceKind, String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./intelcache.sqlite")
}

fn default_user_agent() -> String {
    "intelcache/0.1".into()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    2_000
}

fn default_jitter_ms() -> u64 {
    1_000
}

fn default_worker_count() -> usize {
    4
}

fn default_rate_limits() -> BTreeMap<ServiceKind, RateLimit> {
    ServiceKind::ALL
        .into_iter()
        .map(|s| (s, default_rate_limit(s)))
        .collect()
}

fn default_ttls() -> BTreeMap<ServiceKind, TtlPolicy> {
    ServiceKind::ALL.into_iter().map(|s| (s, default_ttl(s))).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            indicators_path: None,
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            jitter_ms: default_jitter_ms(),
            worker_count: default_worker_count(),
            rate_limits: default_rate_limits(),
            ttl: default_ttls(),
            api_keys: BTreeMap::new(),
            base_urls: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Request timeout as Duration for use with reqwest/tokio.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    /// Rate limit for a service, falling back to the built-in table.
    pub fn rate_limit(&self, service: ServiceKind) -> RateLimit {
        self.rate_limits
            .get(&service)
            .copied()
            .unwrap_or_else(|| default_rate_limit(service))
    }

    /// TTL policy for a service, falling back to the built-in table.
    pub fn ttl_policy(&self, service: ServiceKind) -> TtlPolicy {
        self.ttl.get(&service).copied().unwrap_or_else(|| default_ttl(service))
    }

    pub fn base_url(&self, service: ServiceKind) -> Option<&str> {
        self.base_urls.get(&service).map(String::as_str)
    }

    /// Merge defaults, the TOML file and the environment, then validate.
    ///
    /// # Errors
    ///
    /// `ConfigError::LoadFailed` when a source does not deserialize, or
    /// `ConfigError::Invalid` when a merged value is out of range.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("INTELCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("INTELCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// API key for a service, if one is configured and non-blank.
    pub fn api_key(&self, service: ServiceKind) -> Option<&str> {
        self.api_keys
            .get(&service)
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
    }

    /// API key for a service, or a `Missing` error naming the variable to set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no key is configured for `service`.
    pub fn require_api_key(&self, service: ServiceKind) -> Result<&str, ConfigError> {
        self.api_key(service).ok_or_else(|| ConfigError::Missing {
            field: format!("api_keys.{service}"),
            hint: format!("Set INTELCACHE_API_KEYS__{} environment variable", service.as_str().to_uppercase()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./intelcache.sqlite"));
        assert_eq!(config.user_agent, "intelcache/0.1");
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_backoff_ms, 2_000);
        assert_eq!(config.jitter_ms, 1_000);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.rate_limits.len(), 4);
        assert_eq!(config.ttl.len(), 4);
        assert!(config.api_keys.is_empty());
        assert!(config.indicators_path.is_none());
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.base_backoff(), Duration::from_secs(2));
        assert_eq!(config.jitter(), Duration::from_secs(1));
    }

    #[test]
    fn test_table_lookups_fall_back_to_builtins() {
        let config = AppConfig { rate_limits: BTreeMap::new(), ttl: BTreeMap::new(), ..Default::default() };
        assert_eq!(config.rate_limit(ServiceKind::HashReputation), RateLimit::new(4, 60_000));
        assert_eq!(config.ttl_policy(ServiceKind::IpReputation).ttl_secs, 7 * 86_400);
    }

    #[test]
    fn test_require_api_key_missing() {
        let config = AppConfig::default();
        let result = config.require_api_key(ServiceKind::IpOrg);
        assert!(matches!(result, Err(ConfigError::Missing { ref hint, .. }) if hint.contains("API_KEYS__IP_ORG")));
    }

    #[test]
    fn test_blank_api_key_counts_as_missing() {
        let mut config = AppConfig::default();
        config.api_keys.insert(ServiceKind::IpOrg, "   ".into());
        assert!(config.api_key(ServiceKind::IpOrg).is_none());
    }

    #[test]
    fn test_require_api_key_present() {
        let mut config = AppConfig::default();
        config.api_keys.insert(ServiceKind::HashReputation, "vt-key".into());
        assert_eq!(config.require_api_key(ServiceKind::HashReputation).unwrap(), "vt-key");
    }

    #[test]
    fn test_load_from_env_and_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "intel.toml",
                r#"
                worker_count = 2

                [ttl.ip_reputation]
                ttl_secs = 3600
                "#,
            )?;
            jail.set_env("INTELCACHE_CONFIG_FILE", "intel.toml");
            jail.set_env("INTELCACHE_WORKER_COUNT", "6");
            jail.set_env("INTELCACHE_API_KEYS__HASH_REPUTATION", "vt-key");
            jail.set_env("INTELCACHE_RATE_LIMITS__HASH_REPUTATION__MAX_CALLS", "500");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.worker_count, 6);
            assert_eq!(config.ttl_policy(ServiceKind::IpReputation).ttl_secs, 3600);
            assert_eq!(config.api_key(ServiceKind::HashReputation), Some("vt-key"));
            assert_eq!(config.rate_limit(ServiceKind::HashReputation), RateLimit::new(500, 60_000));
            assert_eq!(config.rate_limit(ServiceKind::IpOrg), default_rate_limit(ServiceKind::IpOrg));
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("INTELCACHE_WORKER_COUNT", "0");
            let result = AppConfig::load();
            assert!(matches!(result, Err(ConfigError::Invalid { ref field, .. }) if field == "worker_count"));
            Ok(())
        });
    }
}
