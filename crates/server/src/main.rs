//! dyncache server entry point.
//!
//! Boots the MCP server on stdio transport. Logging goes to stderr to avoid
//! interfering with the JSON-RPC protocol on stdout. Background cache writes
//! are drained after the client disconnects.

use std::sync::Arc;

use anyhow::Result;
use dyncache_client::{FetchConfig, HttpFetcher};
use dyncache_core::dynamic::{Fetch, SystemClock};
use dyncache_core::{AppConfig, DynamicCache, LifecycleContext, StoreDb};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(db_path = %config.db_path.display(), groups = config.groups.len(), "starting dyncache server on stdio transport");

    let db = StoreDb::open(&config.db_path).await?;
    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(FetchConfig::from_app(&config))?);
    let cache = Arc::new(DynamicCache::from_config(&config, &db, fetcher.clone(), Arc::new(SystemClock))?);
    let ctx = Arc::new(LifecycleContext::new());

    let handler = handler::DyncacheServer::new(cache, fetcher, ctx.clone());
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    tracing::info!(pending = ctx.pending(), "transport closed, settling background cache work");
    ctx.settle().await;

    Ok(())
}
