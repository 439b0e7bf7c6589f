//! cache_fetch tool implementation.
//!
//! Routes a request through the cache groups and falls back to a plain
//! network fetch when no group handles it.

use dyncache_client::cache_url;
use dyncache_core::dynamic::Fetch;
use dyncache_core::{DynamicCache, LifecycleContext, Method, Request};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

/// Input parameters for cache_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheFetchParams {
    /// The URL to fetch. `https://` is assumed when no scheme is given.
    pub url: String,

    /// HTTP method (default: GET). Methods other than GET, HEAD and OPTIONS
    /// invalidate the cached entry for the URL.
    #[serde(default = "default_method")]
    pub method: String,

    /// Optional request body, not allowed for GET and HEAD.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for cache_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheFetchOutput {
    /// Canonical URL the request was made for.
    pub url: String,
    pub method: String,
    pub status: u16,
    pub status_text: String,
    /// Whether a cache group handled the request.
    pub handled: bool,
    /// Response body, lossily decoded as UTF-8.
    pub body: String,
}

/// Implementation of the cache_fetch tool.
pub async fn fetch_impl(
    cache: &DynamicCache, fetcher: &dyn Fetch, ctx: &LifecycleContext, params: CacheFetchParams,
) -> Result<CallToolResult, McpError> {
    let url = cache_url(&params.url)?;

    let Ok(method) = params.method.parse::<Method>();
    if method.as_str().is_empty() || !method.as_str().bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(ToolError::InvalidInput(format!("invalid method: {:?}", params.method)).into());
    }
    if params.body.is_some() && matches!(method, Method::Get | Method::Head) {
        return Err(ToolError::InvalidInput(format!("body not allowed for {method}")).into());
    }

    let mut req = Request::new(method, url);
    if let Some(body) = params.body {
        req = req.with_body(body);
    }

    let (res, handled) = match cache.handle_fetch(&req, ctx).await? {
        Some(res) => (res, true),
        None => (fetcher.fetch(&req).await?, false),
    };

    tracing::info!(method = %req.method, url = %req.url, status = res.status, handled, "cache_fetch");

    json_result(&CacheFetchOutput {
        url: req.url,
        method: req.method.to_string(),
        status: res.status,
        status_text: res.status_text,
        handled,
        body: String::from_utf8_lossy(&res.body).into_owned(),
    })
}
