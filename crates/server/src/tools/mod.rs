//! MCP tool implementations.
//!
//! This module contains all tools exposed by the dyncache server.

pub mod cache;
pub mod fetch;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ToolError;

/// Wrap a tool output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(|e| ToolError::EncodeFailed(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
