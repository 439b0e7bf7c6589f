//! Ordered set of cache groups built from configuration.

use std::sync::Arc;

use futures_util::future::try_join_all;

use super::adapter::{Clock, Fetch};
use super::context::LifecycleContext;
use super::group::CacheGroup;
use crate::Error;
use crate::config::AppConfig;
use crate::http::{Request, Response};
use crate::store::StoreDb;

/// Routes requests to the first group that handles them.
pub struct DynamicCache {
    groups: Vec<Arc<CacheGroup>>,
}

impl DynamicCache {
    pub fn new(groups: Vec<Arc<CacheGroup>>) -> Self {
        Self { groups }
    }

    /// Build every configured group, in configuration order.
    pub fn from_config(
        config: &AppConfig, db: &StoreDb, fetcher: Arc<dyn Fetch>, clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let groups = config
            .groups
            .iter()
            .map(|group| {
                CacheGroup::new(group.clone(), &config.prefix, db.clone(), fetcher.clone(), clock.clone()).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(groups = groups.len(), prefix = %config.prefix, "dynamic cache ready");
        Ok(Self::new(groups))
    }

    pub fn groups(&self) -> &[Arc<CacheGroup>] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&Arc<CacheGroup>> {
        self.groups.iter().find(|g| g.name() == name)
    }

    /// Ask each group in order; the first response wins.
    ///
    /// `Ok(None)` means no group took the request and the caller should go
    /// to the network itself.
    pub async fn handle_fetch(&self, req: &Request, ctx: &LifecycleContext) -> Result<Option<Response>, Error> {
        for group in &self.groups {
            if let Some(res) = group.handle_fetch(req, ctx).await? {
                return Ok(Some(res));
            }
        }
        Ok(None)
    }

    /// Delete the persisted stores of every group.
    pub async fn cleanup(&self) -> Result<(), Error> {
        try_join_all(self.groups.iter().map(|g| g.cleanup())).await?;
        Ok(())
    }
}
