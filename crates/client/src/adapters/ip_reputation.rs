//! IP reputation via AbuseIPDB v2.

use intelcache_core::ServiceKind;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{ServiceAdapter, Verdict, decode, ensure_success, null_as_default, parse_ip};
use crate::error::FetchError;
use crate::transport::{ApiRequest, ApiResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.abuseipdb.com/api/v2";

/// Report look-back window sent with every check.
const MAX_AGE_DAYS: u32 = 90;

const MALICIOUS_SCORE: u8 = 75;
const SUSPICIOUS_SCORE: u8 = 25;

#[derive(Debug, Deserialize)]
struct CheckResponse {
    data: CheckData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckData {
    #[serde(default, deserialize_with = "null_as_default")]
    abuse_confidence_score: u8,
    #[serde(default, deserialize_with = "null_as_default")]
    total_reports: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    num_distinct_users: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    is_public: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    is_whitelisted: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    country_code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    usage_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    isp: String,
    #[serde(default, deserialize_with = "null_as_default")]
    domain: String,
    #[serde(default)]
    last_reported_at: Option<String>,
}

impl CheckData {
    fn verdict(&self) -> Verdict {
        if self.abuse_confidence_score >= MALICIOUS_SCORE {
            Verdict::Malicious
        } else if self.abuse_confidence_score >= SUSPICIOUS_SCORE {
            Verdict::Suspicious
        } else if self.total_reports == 0 {
            Verdict::Unknown
        } else {
            Verdict::Harmless
        }
    }
}

#[derive(Debug, Clone)]
pub struct IpReputationAdapter {
    api_key: String,
    base_url: String,
}

impl IpReputationAdapter {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self { api_key: api_key.into(), base_url: super::base_url(base_url, DEFAULT_BASE_URL) }
    }
}

impl ServiceAdapter for IpReputationAdapter {
    fn service(&self) -> ServiceKind {
        ServiceKind::IpReputation
    }

    fn build_request(&self, key: &str) -> Result<ApiRequest, FetchError> {
        let ip = parse_ip(key)?;
        let url = Url::parse_with_params(
            &format!("{}/check", self.base_url),
            &[("ipAddress", ip.to_string()), ("maxAgeInDays", MAX_AGE_DAYS.to_string())],
        )
        .map_err(|e| FetchError::Request(format!("invalid base URL: {e}")))?;

        Ok(ApiRequest::get(url.as_str()).header("Key", &self.api_key))
    }

    fn parse_response(&self, key: &str, response: &ApiResponse) -> Result<Value, FetchError> {
        let ip = parse_ip(key)?;
        ensure_success(response)?;

        let CheckResponse { data } = decode(response)?;

        Ok(json!({
            "source": "abuseipdb",
            "ip": ip.to_string(),
            "verdict": data.verdict(),
            "abuse_confidence_score": data.abuse_confidence_score,
            "total_reports": data.total_reports,
            "distinct_reporters": data.num_distinct_users,
            "is_public": data.is_public,
            "is_whitelisted": data.is_whitelisted,
            "country_code": data.country_code,
            "usage_type": data.usage_type,
            "isp": data.isp,
            "domain": data.domain,
            "last_reported_at": data.last_reported_at,
        }))
    }
}
