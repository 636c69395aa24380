//! Fetch error types and their retry classification.

use std::time::Duration;

use intelcache_core::{FailureKind, ServiceKind};

/// Whether the retry executor should try again after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Errors from one provider lookup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Key is malformed for the service; never sent over the wire.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// No API key configured for the service.
    #[error("missing API key for {0}")]
    MissingApiKey(ServiceKind),

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Connection refused/reset or body read interrupted.
    #[error("connection error: {0}")]
    Connection(String),

    /// Provider answered 429.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx response.
    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    /// 4xx response other than 429.
    #[error("client error: HTTP {status}")]
    Client { status: u16 },

    /// Response body parse error.
    #[error("parse error: {0}")]
    Parse(String),

    /// The request could not be built.
    #[error("request error: {0}")]
    Request(String),

    /// The run was cancelled before another attempt could start.
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Default retry classification.
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::Timeout
            | FetchError::Connection(_)
            | FetchError::RateLimited { .. }
            | FetchError::Server { .. } => ErrorClass::Retryable,
            FetchError::InvalidKey(_)
            | FetchError::MissingApiKey(_)
            | FetchError::Client { .. }
            | FetchError::Parse(_)
            | FetchError::Request(_)
            | FetchError::Cancelled => ErrorClass::Fatal,
        }
    }

    /// Category persisted with a failed attempt. `None` for cancellation,
    /// which is never recorded.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            FetchError::Timeout | FetchError::Connection(_) | FetchError::Server { .. } => {
                Some(FailureKind::TransientNetwork)
            }
            FetchError::RateLimited { .. } => Some(FailureKind::RateLimitExceeded),
            FetchError::InvalidKey(_)
            | FetchError::MissingApiKey(_)
            | FetchError::Client { .. }
            | FetchError::Request(_) => Some(FailureKind::ClientError),
            FetchError::Parse(_) => Some(FailureKind::ParseError),
            FetchError::Cancelled => None,
        }
    }

    /// Map an HTTP status that the adapter did not handle itself.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 => FetchError::RateLimited { retry_after },
            500..=599 => FetchError::Server { status },
            _ => FetchError::Client { status },
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_builder() {
            FetchError::Request(err.to_string())
        } else {
            FetchError::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FetchError::InvalidKey("not-an-ip".to_string());
        assert!(err.to_string().contains("invalid key"));

        let err = FetchError::MissingApiKey(ServiceKind::IpOrg);
        assert!(err.to_string().contains("ip_org"));
    }

    #[test]
    fn test_transient_failures_are_retryable() {
        assert_eq!(FetchError::Timeout.class(), ErrorClass::Retryable);
        assert_eq!(FetchError::Connection("reset".into()).class(), ErrorClass::Retryable);
        assert_eq!(FetchError::Server { status: 503 }.class(), ErrorClass::Retryable);
        assert_eq!(FetchError::RateLimited { retry_after: None }.class(), ErrorClass::Retryable);
    }

    #[test]
    fn test_caller_failures_are_fatal() {
        assert_eq!(FetchError::Client { status: 403 }.class(), ErrorClass::Fatal);
        assert_eq!(FetchError::InvalidKey("x".into()).class(), ErrorClass::Fatal);
        assert_eq!(FetchError::Parse("eof".into()).class(), ErrorClass::Fatal);
        assert_eq!(FetchError::Cancelled.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            FetchError::from_status(429, Some(Duration::from_secs(7))),
            FetchError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)
        ));
        assert!(matches!(FetchError::from_status(502, None), FetchError::Server { status: 502 }));
        assert!(matches!(FetchError::from_status(401, None), FetchError::Client { status: 401 }));
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(FetchError::Timeout.kind(), Some(FailureKind::TransientNetwork));
        assert_eq!(FetchError::RateLimited { retry_after: None }.kind(), Some(FailureKind::RateLimitExceeded));
        assert_eq!(FetchError::InvalidKey("x".into()).kind(), Some(FailureKind::ClientError));
        assert_eq!(FetchError::Parse("x".into()).kind(), Some(FailureKind::ParseError));
        assert_eq!(FetchError::Cancelled.kind(), None);
    }
}
