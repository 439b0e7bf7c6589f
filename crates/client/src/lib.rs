//! Client code for dyncache.
//!
//! This crate provides the reqwest-backed `Fetch` the cache engine uses to
//! reach the network, plus URL canonicalization for cache keys.

pub mod fetch;

pub use fetch::{FetchConfig, HttpFetcher, UrlError, cache_url, canonicalize};
