//! Cache-group maintenance tools.

pub mod cleanup;
pub mod inspect;

pub use cleanup::{CacheCleanupParams, cleanup_impl};
pub use inspect::{CacheInspectParams, inspect_impl};
