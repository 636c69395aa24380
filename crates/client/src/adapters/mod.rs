//! Provider adapters.
//!
//! An adapter knows one provider's wire format: how to turn an indicator key
//! into an `ApiRequest`, and how to turn the response into the JSON payload
//! stored in the cache. Adapters never touch the cache and never sleep; pacing
//! and retries belong to the caller.

pub mod hash_reputation;
pub mod host_reputation;
pub mod ip_org;
pub mod ip_reputation;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use intelcache_core::{AppConfig, ServiceKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ErrorClass, FetchError};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport};

pub use hash_reputation::HashReputationAdapter;
pub use host_reputation::HostReputationAdapter;
pub use ip_org::IpOrgAdapter;
pub use ip_reputation::IpReputationAdapter;

/// Threat verdict written to the payload's `verdict` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Malicious,
    Suspicious,
    Harmless,
    Unknown,
}

/// One provider's request/response contract.
pub trait ServiceAdapter: Send + Sync {
    fn service(&self) -> ServiceKind;

    /// Validate `key` and describe the lookup. Malformed keys fail with
    /// `FetchError::InvalidKey` before anything is sent.
    fn build_request(&self, key: &str) -> Result<ApiRequest, FetchError>;

    /// Turn a provider response into the cache payload.
    fn parse_response(&self, key: &str, response: &ApiResponse) -> Result<Value, FetchError>;

    /// Retry classification for this provider's failures.
    fn classify_error(&self, err: &FetchError) -> ErrorClass {
        err.class()
    }
}

/// One attempt: build, send, parse.
pub async fn fetch_once(
    adapter: &dyn ServiceAdapter, transport: &dyn HttpTransport, key: &str, timeout: Duration,
) -> Result<Value, FetchError> {
    let request = adapter.build_request(key)?;
    let response = transport.send(request, timeout).await?;
    adapter.parse_response(key, &response)
}

/// Deserialize `null` (or an absent field, with `#[serde(default)]`) as
/// `T::default()`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Map a non-2xx status through the shared table.
pub(crate) fn ensure_success(response: &ApiResponse) -> Result<(), FetchError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(FetchError::from_status(response.status, response.retry_after))
    }
}

pub(crate) fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, FetchError> {
    serde_json::from_slice(&response.body).map_err(|e| FetchError::Parse(e.to_string()))
}

pub(crate) fn base_url<'a>(configured: Option<&'a str>, default: &'a str) -> String {
    configured.unwrap_or(default).trim_end_matches('/').to_string()
}

pub(crate) fn parse_ip(key: &str) -> Result<std::net::IpAddr, FetchError> {
    key.trim()
        .parse()
        .map_err(|_| FetchError::InvalidKey(format!("not an IP address: {key}")))
}

/// The adapters the current configuration can use.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: BTreeMap<ServiceKind, Arc<dyn ServiceAdapter>>,
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet").field("services", &self.services()).finish()
    }
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an adapter for every service that has an API key.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut set = Self::new();
        for service in ServiceKind::ALL {
            let Some(api_key) = config.api_key(service) else {
                tracing::warn!(%service, "no API key configured; service will be skipped");
                continue;
            };
            let base = config.base_url(service);
            let adapter: Arc<dyn ServiceAdapter> = match service {
                ServiceKind::HashReputation => Arc::new(HashReputationAdapter::new(api_key, base)),
                ServiceKind::IpReputation => Arc::new(IpReputationAdapter::new(api_key, base)),
                ServiceKind::HostReputation => Arc::new(HostReputationAdapter::new(api_key, base)),
                ServiceKind::IpOrg => Arc::new(IpOrgAdapter::new(api_key, base)),
            };
            set = set.with(adapter);
        }
        set
    }

    pub fn with(mut self, adapter: Arc<dyn ServiceAdapter>) -> Self {
        self.adapters.insert(adapter.service(), adapter);
        self
    }

    pub fn get(&self, service: ServiceKind) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(&service).cloned()
    }

    pub fn services(&self) -> Vec<ServiceKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Wire {
        #[serde(default, deserialize_with = "null_as_default")]
        tags: Vec<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        name: String,
    }

    #[test]
    fn test_null_as_default() {
        let wire: Wire = serde_json::from_value(json!({"tags": null, "name": null})).unwrap();
        assert!(wire.tags.is_empty());
        assert!(wire.name.is_empty());

        let wire: Wire = serde_json::from_value(json!({})).unwrap();
        assert!(wire.tags.is_empty());

        let wire: Wire = serde_json::from_value(json!({"tags": ["a"], "name": "x"})).unwrap();
        assert_eq!(wire.tags, vec!["a"]);
        assert_eq!(wire.name, "x");
    }

    #[test]
    fn test_ensure_success_maps_status() {
        assert!(ensure_success(&ApiResponse::new(200, "")).is_ok());
        assert!(matches!(
            ensure_success(&ApiResponse::new(429, "").with_retry_after(Duration::from_secs(3))),
            Err(FetchError::RateLimited { retry_after: Some(_) })
        ));
        assert!(matches!(ensure_success(&ApiResponse::new(503, "")), Err(FetchError::Server { status: 503 })));
        assert!(matches!(ensure_success(&ApiResponse::new(401, "")), Err(FetchError::Client { status: 401 })));
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        assert_eq!(base_url(Some("http://127.0.0.1:9000/"), "https://x"), "http://127.0.0.1:9000");
        assert_eq!(base_url(None, "https://x"), "https://x");
    }

    #[test]
    fn test_adapter_set_skips_unkeyed_services() {
        let mut config = AppConfig::default();
        config.api_keys.insert(ServiceKind::IpOrg, "token".into());
        config.api_keys.insert(ServiceKind::HashReputation, "   ".into());

        let set = AdapterSet::from_config(&config);
        assert_eq!(set.services(), vec![ServiceKind::IpOrg]);
        assert!(set.get(ServiceKind::HashReputation).is_none());
    }

    #[tokio::test]
    async fn test_fetch_once_invalid_key_is_never_sent() {
        let adapter = IpOrgAdapter::new("token", None);
        let transport = ScriptedTransport::new();

        let err = fetch_once(&adapter, &transport, "not-an-ip", Duration::from_secs(1)).await.unwrap_err();

        assert!(matches!(err, FetchError::InvalidKey(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_once_parses_payload() {
        let adapter = IpOrgAdapter::new("token", Some("https://ipinfo.test"));
        let transport = ScriptedTransport::new().on(
            "/8.8.8.8/json",
            Ok(ApiResponse::json(200, &json!({"ip": "8.8.8.8", "org": "AS15169 Google LLC"}))),
        );

        let payload = fetch_once(&adapter, &transport, "8.8.8.8", Duration::from_secs(1)).await.unwrap();

        assert_eq!(payload["asn"], "AS15169");
        assert_eq!(transport.calls(), 1);
    }
}
