//! Core types and shared functionality for dyncache.
//!
//! This crate provides:
//! - The dynamic cache engine (groups, strategies, LRU eviction)
//! - SQLite-backed response store and ledger tables
//! - Request/response model
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod dynamic;
pub mod error;
pub mod http;
pub mod store;

pub use config::{AppConfig, GroupConfig, Strategy};
pub use dynamic::{CacheGroup, DynamicCache, Fetch, LifecycleContext};
pub use error::Error;
pub use http::{Method, Request, Response, ResponseKind};
pub use store::StoreDb;
