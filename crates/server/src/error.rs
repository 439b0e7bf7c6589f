//! Structured errors raised by the tool layer itself.
//!
//! Engine failures arrive as `dyncache_core::Error` and convert on their own;
//! these cover argument checks and output encoding.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid input parameters (e.g., a body on a GET).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Tool output could not be encoded as JSON.
    #[error("ENCODE_FAILED: {0}")]
    EncodeFailed(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::InvalidInput(_) => -32602,
            ToolError::EncodeFailed(_) => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
