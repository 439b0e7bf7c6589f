//! cache_inspect tool implementation.
//!
//! Reports the eviction order of one cache group.

use dyncache_core::{DynamicCache, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_inspect tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInspectParams {
    /// Name of the cache group.
    pub group: String,
}

/// Output from the cache_inspect tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInspectOutput {
    pub group: String,
    /// "freshness" or "performance".
    pub strategy: String,
    pub max_size: usize,
    pub size: usize,
    /// Cached URLs, most recently used first.
    pub entries: Vec<String>,
}

/// Implementation of the cache_inspect tool.
pub async fn inspect_impl(cache: &DynamicCache, params: CacheInspectParams) -> Result<CallToolResult, McpError> {
    let group = cache
        .group(&params.group)
        .ok_or_else(|| Error::UnknownGroup(params.group.clone()))?;

    let entries = group.entries().await;
    json_result(&CacheInspectOutput {
        group: group.name().to_string(),
        strategy: group.config().strategy.to_string(),
        max_size: group.config().max_size,
        size: entries.len(),
        entries,
    })
}
