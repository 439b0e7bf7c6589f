//! SQLite-backed storage for cached responses and ledger records.
//!
//! This module provides the two stores the dynamic cache engine consumes,
//! both on one tokio-rusqlite connection:
//!
//! - Named response caches (`ResponseCache`): `match`/`put`/`delete` by request
//! - Named ledger tables (`Table`): JSON records by string key
//! - Whole-namespace deletion for group teardown
//! - Automatic schema migrations and WAL mode

pub mod connection;
pub mod hash;
pub mod migrations;
pub mod responses;
pub mod tables;

pub use connection::StoreDb;
pub use responses::ResponseCache;
pub use tables::Table;
