//! File-hash reputation via VirusTotal v3.
//!
//! `GET {base}/files/{hash}` with the `x-apikey` header. A 404 means the
//! sample is unknown to VirusTotal, which is a valid (if empty) answer.

use chrono::DateTime;
use intelcache_core::ServiceKind;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ServiceAdapter, Verdict, decode, ensure_success, null_as_default};
use crate::error::FetchError;
use crate::transport::{ApiRequest, ApiResponse};

pub const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/api/v3";

/// Engines flagging a sample as malicious before the verdict is `malicious`.
const MALICIOUS_ENGINE_THRESHOLD: u32 = 3;

#[derive(Debug, Deserialize)]
struct FileReport {
    data: FileObject,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    #[serde(default, deserialize_with = "null_as_default")]
    attributes: FileAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct FileAttributes {
    #[serde(default, deserialize_with = "null_as_default")]
    last_analysis_stats: AnalysisStats,
    #[serde(default, deserialize_with = "null_as_default")]
    meaningful_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    type_description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    size: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    reputation: i64,
    #[serde(default)]
    first_submission_date: Option<i64>,
    #[serde(default)]
    last_analysis_date: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    popular_threat_classification: ThreatClassification,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisStats {
    #[serde(default, deserialize_with = "null_as_default")]
    malicious: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    suspicious: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    harmless: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    undetected: u32,
}

impl AnalysisStats {
    fn verdict(&self) -> Verdict {
        if self.malicious >= MALICIOUS_ENGINE_THRESHOLD {
            Verdict::Malicious
        } else if self.malicious > 0 || self.suspicious > 0 {
            Verdict::Suspicious
        } else {
            Verdict::Harmless
        }
    }

    fn total(&self) -> u32 {
        self.malicious + self.suspicious + self.harmless + self.undetected
    }
}

#[derive(Debug, Default, Deserialize)]
struct ThreatClassification {
    #[serde(default, deserialize_with = "null_as_default")]
    suggested_threat_label: String,
}

fn unix_to_rfc3339(ts: Option<i64>) -> Option<String> {
    ts.and_then(|s| DateTime::from_timestamp(s, 0)).map(|dt| dt.to_rfc3339())
}

/// MD5, SHA-1 or SHA-256, lowercased.
fn normalize_hash(key: &str) -> Result<String, FetchError> {
    let hash = key.trim().to_ascii_lowercase();
    let valid_len = matches!(hash.len(), 32 | 40 | 64);
    if !valid_len || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FetchError::InvalidKey(format!("not an MD5/SHA-1/SHA-256 hash: {key}")));
    }
    Ok(hash)
}

#[derive(Debug, Clone)]
pub struct HashReputationAdapter {
    api_key: String,
    base_url: String,
}

impl HashReputationAdapter {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self { api_key: api_key.into(), base_url: super::base_url(base_url, DEFAULT_BASE_URL) }
    }

    fn unknown(hash: &str) -> Value {
        json!({
            "source": "virustotal",
            "hash": hash,
            "found": false,
            "verdict": Verdict::Unknown,
            "malicious": 0,
            "suspicious": 0,
            "total_engines": 0,
        })
    }
}

impl ServiceAdapter for HashReputationAdapter {
    fn service(&self) -> ServiceKind {
        ServiceKind::HashReputation
    }

    fn build_request(&self, key: &str) -> Result<ApiRequest, FetchError> {
        let hash = normalize_hash(key)?;
        Ok(ApiRequest::get(format!("{}/files/{hash}", self.base_url)).header("x-apikey", &self.api_key))
    }

    fn parse_response(&self, key: &str, response: &ApiResponse) -> Result<Value, FetchError> {
        let hash = normalize_hash(key)?;
        if response.status == 404 {
            return Ok(Self::unknown(&hash));
        }
        ensure_success(response)?;

        let report: FileReport = decode(response)?;
        let attrs = report.data.attributes;
        let stats = &attrs.last_analysis_stats;

        let mut tags = attrs.tags;
        tags.sort();
        tags.dedup();

        Ok(json!({
            "source": "virustotal",
            "hash": hash,
            "found": true,
            "verdict": stats.verdict(),
            "malicious": stats.malicious,
            "suspicious": stats.suspicious,
            "harmless": stats.harmless,
            "undetected": stats.undetected,
            "total_engines": stats.total(),
            "threat_label": attrs.popular_threat_classification.suggested_threat_label,
            "meaningful_name": attrs.meaningful_name,
            "type_description": attrs.type_description,
            "size": attrs.size,
            "tags": tags,
            "reputation": attrs.reputation,
            "first_seen": unix_to_rfc3339(attrs.first_submission_date),
            "last_analysis": unix_to_rfc3339(attrs.last_analysis_date),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256: &str = "275A021BBFB6489E54D471899F7DB9D1663FC695EC2FE2A2C4538AABF651FD0F";

    fn adapter() -> HashReputationAdapter {
        HashReputationAdapter::new("vt-key", Some("https://vt.test/api/v3/"))
    }

    fn report(malicious: u32, suspicious: u32) -> ApiResponse {
        ApiResponse::json(
            200,
            &json!({
                "data": {
                    "id": SHA256.to_lowercase(),
                    "type": "file",
                    "attributes": {
                        "last_analysis_stats": {
                            "malicious": malicious, "suspicious": suspicious, "harmless": 0, "undetected": 60
                        },
                        "meaningful_name": "eicar.com",
                        "tags": ["text", "attachment", "text"],
                        "first_submission_date": 1148301722,
                        "popular_threat_classification": null
                    }
                }
            }),
        )
    }

    #[test]
    fn test_build_request() {
        let request = adapter().build_request(SHA256).unwrap();
        assert_eq!(request.url, format!("https://vt.test/api/v3/files/{}", SHA256.to_lowercase()));
        assert_eq!(request.headers, vec![("x-apikey", "vt-key".to_string())]);
        assert_eq!(request.method, reqwest::Method::GET);
    }

    #[test]
    fn test_rejects_malformed_hash() {
        for key in ["", "abc", "zz0a021bbfb6489e54d471899f7db9d1", "../../etc/passwd"] {
            assert!(matches!(adapter().build_request(key), Err(FetchError::InvalidKey(_))), "{key}");
        }
        assert!(adapter().build_request("44d88612fea8a8f36de82e1278abb02f").is_ok());
        assert!(adapter().build_request("3395856ce81f2b7382dee72602f798b642f14140").is_ok());
    }

    #[test]
    fn test_verdict_thresholds() {
        let a = adapter();
        assert_eq!(a.parse_response(SHA256, &report(3, 0)).unwrap()["verdict"], "malicious");
        assert_eq!(a.parse_response(SHA256, &report(2, 0)).unwrap()["verdict"], "suspicious");
        assert_eq!(a.parse_response(SHA256, &report(0, 1)).unwrap()["verdict"], "suspicious");
        assert_eq!(a.parse_response(SHA256, &report(0, 0)).unwrap()["verdict"], "harmless");
    }

    #[test]
    fn test_payload_fields() {
        let payload = adapter().parse_response(SHA256, &report(5, 1)).unwrap();
        assert_eq!(payload["found"], true);
        assert_eq!(payload["total_engines"], 66);
        assert_eq!(payload["tags"], json!(["attachment", "text"]));
        assert_eq!(payload["threat_label"], "");
        assert_eq!(payload["first_seen"], "2006-05-22T12:42:02+00:00");
        assert_eq!(payload["last_analysis"], Value::Null);
    }

    #[test]
    fn test_not_found_is_unknown() {
        let payload = adapter()
            .parse_response(SHA256, &ApiResponse::json(404, &json!({"error": {"code": "NotFoundError"}})))
            .unwrap();
        assert_eq!(payload["verdict"], "unknown");
        assert_eq!(payload["found"], false);
    }

    #[test]
    fn test_error_statuses() {
        let a = adapter();
        assert!(matches!(a.parse_response(SHA256, &ApiResponse::new(401, "")), Err(FetchError::Client { status: 401 })));
        assert!(matches!(
            a.parse_response(SHA256, &ApiResponse::new(429, "")),
            Err(FetchError::RateLimited { .. })
        ));
        assert!(matches!(a.parse_response(SHA256, &ApiResponse::new(200, "<html>")), Err(FetchError::Parse(_))));
    }
}
