//! Network fetch raced against a timeout.
//!
//! The underlying call is spawned once and never cancelled. Two views are
//! derived from it: `raced` gives up at the timeout (or on failure) without
//! stopping the call, `settled` waits for it to finish.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use super::adapter::Fetch;
use crate::Error;
use crate::http::{Request, Response};

type Outcome = Result<Response, String>;

/// A network call in flight, shareable between the caller and background work.
#[derive(Clone)]
pub struct NetworkFetch {
    outcome: Shared<BoxFuture<'static, Outcome>>,
    timeout: Option<Duration>,
}

impl NetworkFetch {
    /// Spawn the request on the runtime.
    ///
    /// With `timeout` set, `raced` stops waiting after it; without, `raced`
    /// is a plain fetch.
    pub fn spawn(fetcher: Arc<dyn Fetch>, req: Request, timeout: Option<Duration>) -> Self {
        let url = req.url.clone();
        let handle = tokio::spawn(async move { fetcher.fetch(&req).await.map_err(|e| e.to_string()) });
        let outcome = async move {
            let outcome = handle.await.unwrap_or_else(|e| Err(format!("fetch task failed: {e}")));
            if let Err(e) = &outcome {
                tracing::debug!(url = %url, error = %e, "network fetch failed");
            }
            outcome
        }
        .boxed()
        .shared();

        Self { outcome, timeout }
    }

    /// The response if it arrived in time; `None` on timeout or failure.
    pub async fn raced(&self) -> Option<Response> {
        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.outcome.clone()).await {
                Ok(outcome) => outcome.ok(),
                Err(_) => {
                    tracing::debug!(timeout_ms = timeout.as_millis() as u64, "network fetch lost the race");
                    None
                }
            },
            None => self.outcome.clone().await.ok(),
        }
    }

    /// Wait for the call to finish, however long it takes.
    pub async fn settled(&self) -> Result<Response, Error> {
        self.outcome.clone().await.map_err(Error::Network)
    }
}
