//! Core types and shared functionality for intelcache.
//!
//! This crate provides:
//! - Indicator identity (`ServiceKind`, `Indicator`)
//! - Indicator cache with SQLite backend
//! - Staleness policy
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod indicator;
pub mod staleness;

pub use cache::{CacheDb, CacheRecord, CacheStore, FailureKind, LastError, ListedRecord, UndecodableRow};
pub use config::{AppConfig, ConfigError, RateLimit};
pub use error::Error;
pub use indicator::{Indicator, ServiceKind};
pub use staleness::{Staleness, TtlPolicy, VerdictPin, classify};
