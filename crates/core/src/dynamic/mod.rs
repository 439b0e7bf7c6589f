//! Runtime caching of network resources, grouped by URL pattern.
//!
//! Each `CacheGroup` caches the resources its patterns match, using one of
//! two strategies:
//!
//! - `performance`: serve from cache while the entry is younger than
//!   `max_age`, go to the network otherwise
//! - `freshness`: go to the network first, fall back to the cache when it is
//!   slower than the group timeout or fails
//!
//! Groups are bounded by an LRU policy (`EvictionChain`) persisted next to
//! the cached responses. Work that outlives a request is registered with a
//! `LifecycleContext` supplied by the host.

pub mod adapter;
pub mod context;
pub mod group;
pub mod lru;
pub mod network;
pub mod registry;

pub use adapter::{Clock, Fetch, SystemClock};
pub use context::LifecycleContext;
pub use group::{AgeRecord, CacheGroup, CacheHit, StoreNames};
pub use lru::{EvictionChain, EvictionChainState, EvictionNode};
pub use network::NetworkFetch;
pub use registry::DynamicCache;
