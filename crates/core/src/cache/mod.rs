//! SQLite-backed cache of threat-intelligence lookups.
//!
//! This module provides a persistent `(service, key)` keyed table using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Upsert-on-conflict writes that replace payloads atomically
//! - Failure bookkeeping that never regresses a good refresh
//! - Automatic schema migrations
//! - WAL mode for concurrent readers

pub mod connection;
pub mod migrations;
pub mod records;
pub mod store;

pub use crate::Error;

pub use connection::CacheDb;
pub use records::{CacheRecord, FailureKind, LastError, ListedRecord, RecordCounts, UndecodableRow};
pub use store::CacheStore;
