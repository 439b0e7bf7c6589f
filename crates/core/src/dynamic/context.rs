//! Lifetime extension for background cache work.
//!
//! Cache refreshes and late network writes finish after the caller already has
//! its response. They are spawned here rather than detached, so the host can
//! see how many are pending and wait for them before tearing down.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::task::{JoinError, JoinSet};

/// Tracks background tasks that must complete before the host shuts down.
#[derive(Debug, Default)]
pub struct LifecycleContext {
    tasks: Mutex<JoinSet<()>>,
}

impl LifecycleContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `task` and keep the context alive until it settles.
    ///
    /// Tasks that already finished are reaped first, so a long-lived context
    /// only holds work still in flight. Must be called from within a tokio
    /// runtime.
    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks();
        while let Some(result) = tasks.try_join_next() {
            log_failure(result);
        }
        tasks.spawn(task);
    }

    /// Number of registered tasks that have not been reaped yet.
    pub fn pending(&self) -> usize {
        self.tasks().len()
    }

    /// Wait for every registered task, including ones registered while waiting.
    pub async fn settle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks());
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                log_failure(result);
            }
        }
    }
}

fn log_failure(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "background cache task failed");
    }
}
