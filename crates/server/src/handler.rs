//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.

use std::sync::Arc;

use crate::tools::cache::{CacheCleanupParams, CacheInspectParams, cleanup_impl, inspect_impl};
use crate::tools::fetch::{CacheFetchParams, fetch_impl};
use dyncache_core::dynamic::Fetch;
use dyncache_core::{DynamicCache, LifecycleContext};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for dyncache.
#[derive(Clone)]
pub struct DyncacheServer {
    tool_router: ToolRouter<Self>,
    cache: Arc<DynamicCache>,
    fetcher: Arc<dyn Fetch>,
    ctx: Arc<LifecycleContext>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl DyncacheServer {
    /// Create a new server handler.
    ///
    /// Background cache writes are registered with `ctx`; the caller drains
    /// it after the transport closes.
    pub fn new(cache: Arc<DynamicCache>, fetcher: Arc<dyn Fetch>, ctx: Arc<LifecycleContext>) -> Self {
        Self { tool_router: Self::tool_router(), cache, fetcher, ctx }
    }

    /// Fetch a URL through the cache groups.
    #[tool(
        description = "Fetch a URL through the configured cache groups. GET/HEAD are served per the group's strategy (freshness or performance); other methods invalidate the cached entry. Falls back to a plain network fetch when no group matches."
    )]
    async fn cache_fetch(&self, params: Parameters<CacheFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.cache, self.fetcher.as_ref(), &self.ctx, params.0).await
    }

    /// Show the eviction order of a cache group.
    #[tool(description = "Inspect a cache group: strategy, size, and cached URLs from most to least recently used.")]
    async fn cache_inspect(&self, params: Parameters<CacheInspectParams>) -> Result<CallToolResult, McpError> {
        inspect_impl(&self.cache, params.0).await
    }

    /// Delete persisted cache data.
    #[tool(description = "Delete the persisted cache, age ledger and LRU chain of one group, or of all groups.")]
    async fn cache_cleanup(&self, params: Parameters<CacheCleanupParams>) -> Result<CallToolResult, McpError> {
        cleanup_impl(&self.cache, params.0).await
    }
}

impl ServerHandler for DyncacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "dyncache".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{EchoFetch, registry};

    #[tokio::test]
    async fn test_lists_cache_tools() {
        let fetcher = Arc::new(EchoFetch::default());
        let cache = Arc::new(registry(fetcher.clone()).await);
        let server = DyncacheServer::new(cache, fetcher, Arc::new(LifecycleContext::new()));

        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["cache_cleanup", "cache_fetch", "cache_inspect"]);
    }

    #[tokio::test]
    async fn test_server_info() {
        let fetcher = Arc::new(EchoFetch::default());
        let cache = Arc::new(registry(fetcher.clone()).await);
        let info = DyncacheServer::new(cache, fetcher, Arc::new(LifecycleContext::new())).get_info();
        assert_eq!(info.server_info.name, "dyncache");
        assert!(info.capabilities.tools.is_some());
    }
}
