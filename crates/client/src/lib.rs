//! Provider-facing code for intelcache.
//!
//! This crate provides the HTTP transport, per-service rate limiting, the
//! retry executor, cooperative cancellation and the four service adapters
//! used by the refresher.

pub mod adapters;
pub mod cancel;
pub mod error;
pub mod ratelimit;
pub mod retry;
pub mod transport;

pub use adapters::{AdapterSet, ServiceAdapter, Verdict, fetch_once};
pub use cancel::{CancelHandle, Cancellation, cancellation};
pub use error::{ErrorClass, FetchError};
pub use ratelimit::{RateLimiter, RateLimiters};
pub use retry::{Attempted, RetryError, RetryExecutor, RetryPolicy};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, ScriptedTransport};
