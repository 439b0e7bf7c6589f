//! Seams between the cache engine and its host.
//!
//! The engine never talks to the network or reads the wall clock directly;
//! the host supplies a `Fetch` and a `Clock`, which tests replace.

use async_trait::async_trait;

use crate::Error;
use crate::http::{Request, Response};

/// Executes a request against the network.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform the request. Non-2xx statuses are responses, not errors;
    /// errors mean no response was obtained at all.
    async fn fetch(&self, req: &Request) -> Result<Response, Error>;
}

/// Source of the timestamps written to the age ledger.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
