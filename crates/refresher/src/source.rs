//! Indicator source: newline-delimited `service key` records.
//!
//! ```text
//! # honeypot session 4411
//! hash_reputation 44d88612fea8a8f36de82e1278abb02f
//! ip-reputation   185.220.101.1
//! host_reputation http://evil.example/bins/mozi.m
//! ```

use std::path::Path;

use intelcache_core::{Indicator, ServiceKind};
use tokio::io::AsyncReadExt;

use crate::error::RefreshError;

/// Parse source text. Blank lines and `#` comments are ignored.
pub fn parse_indicators(text: &str) -> Result<Vec<Indicator>, RefreshError> {
    let mut indicators = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let invalid = |reason: String| RefreshError::InvalidSource { line: idx + 1, reason };

        let mut fields = line.split_whitespace();
        let (Some(service), Some(key), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(invalid("expected `<service> <key>`".into()));
        };
        let service: ServiceKind = service.parse().map_err(|e: intelcache_core::Error| invalid(e.to_string()))?;

        indicators.push(Indicator::new(service, key));
    }

    Ok(indicators)
}

/// Read indicators from `path`, or from stdin when no path is configured.
pub async fn read_indicators(path: Option<&Path>) -> Result<Vec<Indicator>, RefreshError> {
    let text = match path {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };

    let indicators = parse_indicators(&text)?;
    tracing::info!(count = indicators.len(), source = ?path, "loaded indicators");
    Ok(indicators)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let text = "# session 1\n\nhash_reputation 44d88612fea8a8f36de82e1278abb02f\n  ip-org\t8.8.8.8  \n";
        let indicators = parse_indicators(text).unwrap();

        assert_eq!(
            indicators,
            vec![
                Indicator::new(ServiceKind::HashReputation, "44d88612fea8a8f36de82e1278abb02f"),
                Indicator::new(ServiceKind::IpOrg, "8.8.8.8"),
            ]
        );
    }

    #[test]
    fn test_parse_keeps_duplicates_for_the_orchestrator() {
        let indicators = parse_indicators("ip_org 1.1.1.1\nip_org 1.1.1.1\n").unwrap();
        assert_eq!(indicators.len(), 2);
    }

    #[test]
    fn test_unknown_service_reports_line() {
        let err = parse_indicators("ip_org 1.1.1.1\ndns example.com\n").unwrap_err();
        assert!(matches!(err, RefreshError::InvalidSource { line: 2, .. }));
        assert!(err.to_string().contains("unknown service"));
    }

    #[test]
    fn test_missing_or_extra_fields() {
        assert!(matches!(parse_indicators("ip_org").unwrap_err(), RefreshError::InvalidSource { line: 1, .. }));
        assert!(parse_indicators("ip_org 1.1.1.1 extra").is_err());
    }

    #[tokio::test]
    async fn test_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indicators.txt");
        std::fs::write(&path, "host_reputation evil.example\n").unwrap();

        let indicators = read_indicators(Some(&path)).await.unwrap();
        assert_eq!(indicators, vec![Indicator::new(ServiceKind::HostReputation, "evil.example")]);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let err = read_indicators(Some(Path::new("/nonexistent/indicators.txt"))).await.unwrap_err();
        assert!(matches!(err, RefreshError::Io(_)));
    }
}
