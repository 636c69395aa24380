//! IP to ASN/organization via ipinfo.

use intelcache_core::ServiceKind;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ServiceAdapter, decode, ensure_success, null_as_default, parse_ip};
use crate::error::FetchError;
use crate::transport::{ApiRequest, ApiResponse};

pub const DEFAULT_BASE_URL: &str = "https://ipinfo.io";

#[derive(Debug, Default, Deserialize)]
struct IpDetails {
    #[serde(default, deserialize_with = "null_as_default")]
    hostname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    city: String,
    #[serde(default, deserialize_with = "null_as_default")]
    region: String,
    #[serde(default, deserialize_with = "null_as_default")]
    country: String,
    #[serde(default, deserialize_with = "null_as_default")]
    org: String,
    #[serde(default, deserialize_with = "null_as_default")]
    timezone: String,
    #[serde(default, deserialize_with = "null_as_default")]
    bogon: bool,
}

/// Split `"AS15169 Google LLC"` into `("AS15169", "Google LLC")`.
fn split_org(org: &str) -> (Option<&str>, Option<&str>) {
    let org = org.trim();
    if org.is_empty() {
        return (None, None);
    }
    match org.split_once(' ') {
        Some((asn, name)) if is_asn(asn) => (Some(asn), Some(name.trim()).filter(|n| !n.is_empty())),
        None if is_asn(org) => (Some(org), None),
        _ => (None, Some(org)),
    }
}

fn is_asn(token: &str) -> bool {
    token
        .strip_prefix("AS")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

#[derive(Debug, Clone)]
pub struct IpOrgAdapter {
    token: String,
    base_url: String,
}

impl IpOrgAdapter {
    pub fn new(token: impl Into<String>, base_url: Option<&str>) -> Self {
        Self { token: token.into(), base_url: super::base_url(base_url, DEFAULT_BASE_URL) }
    }
}

impl ServiceAdapter for IpOrgAdapter {
    fn service(&self) -> ServiceKind {
        ServiceKind::IpOrg
    }

    fn build_request(&self, key: &str) -> Result<ApiRequest, FetchError> {
        let ip = parse_ip(key)?;
        Ok(ApiRequest::get(format!("{}/{ip}/json", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token)))
    }

    fn parse_response(&self, key: &str, response: &ApiResponse) -> Result<Value, FetchError> {
        let ip = parse_ip(key)?;
        ensure_success(response)?;

        let details: IpDetails = decode(response)?;
        let (asn, organization) = split_org(&details.org);

        Ok(json!({
            "source": "ipinfo",
            "ip": ip.to_string(),
            "asn": asn,
            "organization": organization,
            "hostname": details.hostname,
            "city": details.city,
            "region": details.region,
            "country": details.country,
            "timezone": details.timezone,
            "bogon": details.bogon,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> IpOrgAdapter {
        IpOrgAdapter::new("ipinfo-token", Some("https://ipinfo.test"))
    }

    #[test]
    fn test_split_org() {
        assert_eq!(split_org("AS15169 Google LLC"), (Some("AS15169"), Some("Google LLC")));
        assert_eq!(split_org("AS13335"), (Some("AS13335"), None));
        assert_eq!(split_org("Some Hosting Co"), (None, Some("Some Hosting Co")));
        assert_eq!(split_org("ASUS Cloud"), (None, Some("ASUS Cloud")));
        assert_eq!(split_org(""), (None, None));
    }

    #[test]
    fn test_build_request() {
        let request = adapter().build_request("8.8.8.8").unwrap();
        assert_eq!(request.url, "https://ipinfo.test/8.8.8.8/json");
        assert_eq!(request.headers, vec![("Authorization", "Bearer ipinfo-token".to_string())]);
    }

    #[test]
    fn test_parse_full_response() {
        let response = ApiResponse::json(
            200,
            &json!({
                "ip": "8.8.8.8",
                "hostname": "dns.google",
                "city": "Mountain View",
                "region": "California",
                "country": "US",
                "loc": "37.4056,-122.0775",
                "org": "AS15169 Google LLC",
                "timezone": "America/Los_Angeles"
            }),
        );
        let payload = adapter().parse_response("8.8.8.8", &response).unwrap();

        assert_eq!(payload["asn"], "AS15169");
        assert_eq!(payload["organization"], "Google LLC");
        assert_eq!(payload["hostname"], "dns.google");
        assert_eq!(payload["bogon"], false);
    }

    #[test]
    fn test_bogon_is_valid_payload() {
        let response = ApiResponse::json(200, &json!({"ip": "10.0.0.1", "bogon": true}));
        let payload = adapter().parse_response("10.0.0.1", &response).unwrap();

        assert_eq!(payload["bogon"], true);
        assert_eq!(payload["asn"], Value::Null);
        assert_eq!(payload["organization"], Value::Null);
    }

    #[test]
    fn test_rate_limited() {
        let response = ApiResponse::new(429, "").with_retry_after(std::time::Duration::from_secs(30));
        let err = adapter().parse_response("8.8.8.8", &response).unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { retry_after: Some(_) }));
    }
}
