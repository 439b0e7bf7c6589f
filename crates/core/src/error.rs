//! Unified error types for dyncache.
//!
//! Display strings carry a stable uppercase code prefix so that hosts can
//! surface them without parsing the message body.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the dynamic cache engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A group was configured with a strategy name this engine does not know.
    #[error("UNKNOWN_STRATEGY: {0}")]
    UnknownStrategy(String),

    /// A group URL pattern failed to compile.
    #[error("INVALID_PATTERN: {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// No group with the given name is registered.
    #[error("UNKNOWN_GROUP: {0}")]
    UnknownGroup(String),

    /// A ledger table has no record under the requested key.
    #[error("RECORD_NOT_FOUND: {table}/{key}")]
    RecordNotFound { table: String, key: String },

    /// A stored record could not be encoded or decoded.
    #[error("CACHE_ERROR: corrupt record: {0}")]
    CorruptRecord(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The network call failed and no fallback path was left.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CorruptRecord(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::UnknownStrategy(name) => (-32020, format!("unknown strategy: {name}")),
            Error::InvalidPattern { pattern, reason } => (-32021, format!("{pattern}: {reason}")),
            Error::UnknownGroup(name) => (-32022, format!("unknown group: {name}")),
            Error::RecordNotFound { table, key } => (-32001, format!("{table}/{key}")),
            Error::Network(msg) => (-32008, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::CorruptRecord(msg) => (-32002, msg.clone()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
