//! cache_cleanup tool implementation.
//!
//! Deletes the persisted stores of one group, or of every group.

use dyncache_core::{DynamicCache, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_cleanup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheCleanupParams {
    /// Group to clean up; all groups when omitted.
    #[serde(default)]
    pub group: Option<String>,
}

/// Output from the cache_cleanup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheCleanupOutput {
    /// Names of the groups whose stores were deleted.
    pub cleaned: Vec<String>,
}

/// Implementation of the cache_cleanup tool.
pub async fn cleanup_impl(cache: &DynamicCache, params: CacheCleanupParams) -> Result<CallToolResult, McpError> {
    let cleaned = match params.group {
        Some(name) => {
            let group = cache.group(&name).ok_or(Error::UnknownGroup(name))?;
            group.cleanup().await?;
            vec![group.name().to_string()]
        }
        None => {
            cache.cleanup().await?;
            cache.groups().iter().map(|g| g.name().to_string()).collect()
        }
    };

    tracing::info!(groups = ?cleaned, "cache_cleanup");
    json_result(&CacheCleanupOutput { cleaned })
}
