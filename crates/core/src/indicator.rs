//! Indicator identity: which service owns a lookup and the key it is made by.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// External threat-intelligence service that owns a cached lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// File-hash reputation (VirusTotal).
    HashReputation,
    /// IP reputation (AbuseIPDB).
    IpReputation,
    /// Malicious host/URL reputation (URLhaus).
    HostReputation,
    /// IP to organization/ASN mapping (ipinfo).
    IpOrg,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] =
        [ServiceKind::HashReputation, ServiceKind::IpReputation, ServiceKind::HostReputation, ServiceKind::IpOrg];

    /// Stable name used in the database, configuration and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::HashReputation => "hash_reputation",
            ServiceKind::IpReputation => "ip_reputation",
            ServiceKind::HostReputation => "host_reputation",
            ServiceKind::IpOrg => "ip_org",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = Error;

    /// Accepts the canonical snake_case name plus the kebab-case spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "hash_reputation" => Ok(ServiceKind::HashReputation),
            "ip_reputation" => Ok(ServiceKind::IpReputation),
            "host_reputation" => Ok(ServiceKind::HostReputation),
            "ip_org" => Ok(ServiceKind::IpOrg),
            other => Err(Error::InvalidInput(format!("unknown service: {other}"))),
        }
    }
}

/// One observed artifact eligible for a lookup, identified by `(service, key)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Indicator {
    pub service: ServiceKind,
    pub key: String,
}

impl Indicator {
    pub fn new(service: ServiceKind, key: impl Into<String>) -> Self {
        Self { service, key: key.into() }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.key)
    }
}
