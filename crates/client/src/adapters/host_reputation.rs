//! Host/URL reputation via URLhaus.
//!
//! `POST {base}/v1/host/` with form field `host`. URLhaus returns `null` for
//! empty `urls`, `tags` and `blacklists`, so every list field on the wire
//! structs defaults through `null_as_default`.

use std::collections::{BTreeMap, BTreeSet};

use intelcache_core::ServiceKind;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{ServiceAdapter, Verdict, decode, ensure_success, null_as_default};
use crate::error::FetchError;
use crate::transport::{ApiRequest, ApiResponse};

pub const DEFAULT_BASE_URL: &str = "https://urlhaus-api.abuse.ch";

#[derive(Debug, Deserialize)]
struct HostResponse {
    query_status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    urlhaus_reference: String,
    #[serde(default)]
    firstseen: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    blacklists: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    urls: Vec<HostUrl>,
}

#[derive(Debug, Default, Deserialize)]
struct HostUrl {
    #[serde(default, deserialize_with = "null_as_default")]
    url_status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    threat: String,
    #[serde(default, deserialize_with = "null_as_default")]
    tags: Vec<String>,
}

/// Accept a bare host or a URL, returning the lowercased host.
fn normalize_host(key: &str) -> Result<String, FetchError> {
    let key = key.trim();
    let invalid = || FetchError::InvalidKey(format!("not a host or URL: {key}"));

    let host = if key.contains("://") {
        let url = Url::parse(key).map_err(|_| invalid())?;
        url.host_str().ok_or_else(invalid)?.to_string()
    } else {
        key.trim_end_matches('.').to_string()
    };

    let host = host.trim_matches(|c| c == '[' || c == ']').to_ascii_lowercase();
    let well_formed = !host.is_empty()
        && host.len() <= 253
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
    if !well_formed {
        return Err(invalid());
    }
    Ok(host)
}

#[derive(Debug, Clone)]
pub struct HostReputationAdapter {
    auth_key: String,
    base_url: String,
}

impl HostReputationAdapter {
    pub fn new(auth_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self { auth_key: auth_key.into(), base_url: super::base_url(base_url, DEFAULT_BASE_URL) }
    }
}

impl ServiceAdapter for HostReputationAdapter {
    fn service(&self) -> ServiceKind {
        ServiceKind::HostReputation
    }

    fn build_request(&self, key: &str) -> Result<ApiRequest, FetchError> {
        let host = normalize_host(key)?;
        Ok(ApiRequest::post_form(format!("{}/v1/host/", self.base_url), vec![("host".to_string(), host)])
            .header("Auth-Key", &self.auth_key))
    }

    fn parse_response(&self, key: &str, response: &ApiResponse) -> Result<Value, FetchError> {
        let host = normalize_host(key)?;
        ensure_success(response)?;

        let body: HostResponse = decode(response)?;
        match body.query_status.as_str() {
            "ok" | "no_results" => {}
            "invalid_host" => return Err(FetchError::InvalidKey(format!("rejected by provider: {host}"))),
            other => return Err(FetchError::Parse(format!("unexpected query_status: {other}"))),
        }

        let tags: BTreeSet<&str> = body
            .urls
            .iter()
            .flat_map(|u| u.tags.iter().map(String::as_str))
            .collect();
        let threats: BTreeSet<&str> = body
            .urls
            .iter()
            .map(|u| u.threat.as_str())
            .filter(|t| !t.is_empty())
            .collect();
        let url_count = body.urls.len();
        let online_count = body.urls.iter().filter(|u| u.url_status == "online").count();

        let verdict = if body.query_status == "no_results" {
            Verdict::Unknown
        } else if online_count > 0 {
            Verdict::Malicious
        } else if url_count > 0 {
            Verdict::Suspicious
        } else {
            Verdict::Unknown
        };

        Ok(json!({
            "source": "urlhaus",
            "host": host,
            "found": body.query_status == "ok",
            "verdict": verdict,
            "url_count": url_count,
            "online_count": online_count,
            "tags": tags,
            "threats": threats,
            "blacklists": body.blacklists,
            "first_seen": body.firstseen,
            "reference": body.urlhaus_reference,
        }))
    }
}
