//! A group of cached resources selected by URL patterns and kept under an
//! LRU policy.
//!
//! Each group persists three things independently: the response bodies, an
//! age ledger with one record per URL, and the serialized eviction chain.
//! Whenever the three disagree (a crash between writes, a missing age record,
//! a corrupt chain) the entry is treated as expired rather than as an error.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};

use super::adapter::{Clock, Fetch};
use super::context::LifecycleContext;
use super::lru::{EvictionChain, EvictionChainState};
use super::network::NetworkFetch;
use crate::Error;
use crate::config::{GroupConfig, Strategy};
use crate::http::{Method, Request, Response, ResponseKind};
use crate::store::{ResponseCache, StoreDb, Table};

/// Key of the single record holding the serialized chain.
const LRU_KEY: &str = "lru";

/// How old a cached resource is, stored in the age ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRecord {
    /// Time the response was stored, in epoch milliseconds.
    pub age: i64,
}

/// A response found in the cache together with its age in milliseconds.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub response: Response,
    pub age: i64,
}

/// Persisted namespace names for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
    pub cache: String,
    pub age: String,
    pub lru: String,
}

impl StoreNames {
    pub fn new(prefix: &str, group: &str) -> Self {
        Self {
            cache: format!("{prefix}:dynamic:{group}:cache"),
            age: format!("{prefix}:dynamic:{group}:age"),
            lru: format!("{prefix}:dynamic:{group}:lru"),
        }
    }
}

/// Durations beyond `i64::MAX` milliseconds mean "never".
fn clamp_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// One configured cache group.
///
/// Store handles are opened on first use and kept; the chain is loaded once
/// and written back after every operation that changes it.
pub struct CacheGroup {
    config: GroupConfig,
    patterns: Vec<Regex>,
    names: StoreNames,
    db: StoreDb,
    fetcher: Arc<dyn Fetch>,
    clock: Arc<dyn Clock>,
    cache: OnceCell<ResponseCache>,
    age_table: OnceCell<Table>,
    lru_table: OnceCell<Table>,
    lru: Mutex<Option<EvictionChain>>,
}

impl CacheGroup {
    /// Build a group. Nothing is read from the store until the first request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPattern` if a URL pattern does not compile.
    pub fn new(
        config: GroupConfig, prefix: &str, db: StoreDb, fetcher: Arc<dyn Fetch>, clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::InvalidPattern { pattern: p.clone(), reason: e.to_string() }))
            .collect::<Result<Vec<_>, _>>()?;
        let names = StoreNames::new(prefix, &config.name);

        Ok(Self {
            config,
            patterns,
            names,
            db,
            fetcher,
            clock,
            cache: OnceCell::new(),
            age_table: OnceCell::new(),
            lru_table: OnceCell::new(),
            lru: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn store_names(&self) -> &StoreNames {
        &self.names
    }

    /// Whether any of the group's patterns matches `url`.
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }

    /// Tracked URLs, most recently used first.
    pub async fn entries(&self) -> Vec<String> {
        self.with_chain(|chain| chain.iter().map(str::to_string).collect()).await
    }

    /// Number of tracked URLs.
    pub async fn len(&self) -> usize {
        self.with_chain(|chain| chain.size()).await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Handle a request if it belongs to this group.
    ///
    /// Returns `Ok(None)` when the URL matches none of the patterns or the
    /// method is OPTIONS. GET and HEAD go through the configured strategy;
    /// any other method invalidates the cached entry and goes to the network.
    ///
    /// # Errors
    ///
    /// Only the freshness strategy's last-resort network fetch surfaces an
    /// error; every other failure degrades to a cached or synthesized response.
    pub async fn handle_fetch(
        self: &Arc<Self>, req: &Request, ctx: &LifecycleContext,
    ) -> Result<Option<Response>, Error> {
        if !self.matches(&req.url) {
            return Ok(None);
        }

        self.with_chain(|_| ()).await;

        match req.method {
            Method::Options => Ok(None),
            Method::Get | Method::Head => {
                let res = match self.config.strategy {
                    Strategy::Freshness => self.handle_with_freshness(req, ctx).await?,
                    Strategy::Performance => self.handle_with_performance(req, ctx).await,
                };
                Ok(Some(res))
            }
            _ => {
                let was_cached = self.with_chain(|chain| chain.remove(&req.url)).await;
                if was_cached {
                    tracing::debug!(group = %self.config.name, url = %req.url, method = %req.method, "invalidating");
                    if let Err(e) = self.clear_cache_for_url(&req.url).await {
                        tracing::warn!(group = %self.config.name, url = %req.url, error = %e, "failed to purge entry");
                    }
                }
                self.sync_chain_logged().await;

                Ok(Some(self.safe_fetch(req).await))
            }
        }
    }

    async fn handle_with_performance(self: &Arc<Self>, req: &Request, ctx: &LifecycleContext) -> Response {
        if let Some(hit) = self.load_from_cache(req, Some(clamp_ms(self.config.max_age_ms))).await {
            if let Some(refresh_ahead) = self.config.refresh_ahead_ms
                && hit.age >= clamp_ms(refresh_ahead)
            {
                tracing::debug!(group = %self.config.name, url = %req.url, age = hit.age, "refreshing ahead");
                let refresh = NetworkFetch::spawn(self.fetcher.clone(), req.clone(), None);
                self.cache_in_background(ctx, req, refresh, false);
            }
            return hit.response;
        }

        if self.config.timeout_ms.is_none() {
            let res = self.safe_fetch(req).await;
            self.cache_response_logged(req, res.clone(), false).await;
            return res;
        }

        let network = NetworkFetch::spawn(self.fetcher.clone(), req.clone(), self.config.timeout());
        match network.raced().await {
            Some(res) => {
                self.cache_response_logged(req, res.clone(), false).await;
                res
            }
            None => {
                self.cache_in_background(ctx, req, network, false);
                Response::gateway_timeout()
            }
        }
    }

    async fn handle_with_freshness(self: &Arc<Self>, req: &Request, ctx: &LifecycleContext) -> Result<Response, Error> {
        let network = NetworkFetch::spawn(self.fetcher.clone(), req.clone(), self.config.timeout());

        if let Some(res) = network.raced().await {
            self.cache_response_logged(req, res.clone(), true).await;
            return Ok(res);
        }

        // The network call keeps running; whatever it returns still lands in the cache.
        self.cache_in_background(ctx, req, network.clone(), true);

        if let Some(hit) = self.load_from_cache(req, None).await {
            tracing::debug!(group = %self.config.name, url = %req.url, age = hit.age, "serving cached fallback");
            return Ok(hit.response);
        }

        let res = network.settled().await?;
        self.cache_response_logged(req, res.clone(), true).await;
        Ok(res)
    }

    /// Look up a cached response.
    ///
    /// With `max_age` set, entries older than it (or without a readable age
    /// record) are evicted and reported as a miss. Without it any entry with
    /// an age record is accepted.
    pub async fn load_from_cache(&self, req: &Request, max_age: Option<i64>) -> Option<CacheHit> {
        let cache = match self.cache().await {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(group = %self.config.name, error = %e, "response cache unavailable");
                return None;
            }
        };

        let res = match cache.match_request(req).await {
            Ok(Some(res)) => res,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(group = %self.config.name, url = %req.url, error = %e, "cache lookup failed");
                return None;
            }
        };

        match self.read_age(&req.url).await {
            Some(age) if max_age.is_none_or(|max| age <= max) => {
                tracing::debug!(group = %self.config.name, url = %req.url, age, "cache hit");
                self.with_chain(|chain| chain.accessed(&req.url)).await;
                self.sync_chain_logged().await;
                return Some(CacheHit { response: res, age });
            }
            Some(age) => tracing::debug!(group = %self.config.name, url = %req.url, age, "cache entry expired"),
            None => tracing::debug!(group = %self.config.name, url = %req.url, "no age record, treating as expired"),
        }

        self.with_chain(|chain| chain.remove(&req.url)).await;
        if let Err(e) = self.clear_cache_for_url(&req.url).await {
            tracing::warn!(group = %self.config.name, url = %req.url, error = %e, "failed to purge expired entry");
        }
        self.sync_chain_logged().await;
        None
    }

    /// Store a response and record it as most recently used.
    ///
    /// Only successful responses are stored; opaque ones too when
    /// `allow_opaque` is set. A full chain evicts its tail first.
    pub async fn cache_response(&self, req: &Request, res: Response, allow_opaque: bool) -> Result<(), Error> {
        let cacheable = res.ok() || (allow_opaque && res.kind == ResponseKind::Opaque);
        if !cacheable {
            tracing::debug!(group = %self.config.name, url = %req.url, status = res.status, "not caching");
            return Ok(());
        }

        let max_size = self.config.max_size;
        let evicted = self
            .with_chain(|chain| {
                let mut evicted = Vec::new();
                if !chain.contains(&req.url) {
                    while chain.size() >= max_size {
                        match chain.pop() {
                            Some(url) => evicted.push(url),
                            None => break,
                        }
                    }
                }
                chain.accessed(&req.url);
                evicted
            })
            .await;

        for url in &evicted {
            tracing::debug!(group = %self.config.name, url = %url, "evicting least recently used");
            self.clear_cache_for_url(url).await?;
        }

        self.cache().await?.put(req, &res).await?;
        self.age_table()
            .await?
            .write(&req.url, &AgeRecord { age: self.clock.now_ms() })
            .await?;
        self.sync_chain().await
    }

    /// Delete every persisted store of this group.
    pub async fn cleanup(&self) -> Result<(), Error> {
        let mut lru = self.lru.lock().await;
        tokio::try_join!(
            self.db.delete_cache(&self.names.cache),
            self.db.delete_table(&self.names.age),
            self.db.delete_table(&self.names.lru),
        )?;
        *lru = None;
        tracing::info!(group = %self.config.name, "cleaned up group stores");
        Ok(())
    }

    async fn cache_response_logged(&self, req: &Request, res: Response, allow_opaque: bool) {
        if let Err(e) = self.cache_response(req, res, allow_opaque).await {
            tracing::warn!(group = %self.config.name, url = %req.url, error = %e, "failed to cache response");
        }
    }

    fn cache_in_background(
        self: &Arc<Self>, ctx: &LifecycleContext, req: &Request, network: NetworkFetch, allow_opaque: bool,
    ) {
        let group = Arc::clone(self);
        let req = req.clone();
        ctx.wait_until(async move {
            match network.settled().await {
                Ok(res) => group.cache_response_logged(&req, res, allow_opaque).await,
                Err(e) => tracing::debug!(group = %group.config.name, url = %req.url, error = %e, "nothing to cache"),
            }
        });
    }

    /// Clear the GET and HEAD variants and the age record of `url`.
    ///
    /// The chain is left alone; callers have already removed the URL from it.
    async fn clear_cache_for_url(&self, url: &str) -> Result<(), Error> {
        let cache = self.cache().await?;
        let ages = self.age_table().await?;
        let get = Request::get(url);
        let head = get.with_method(Method::Head);
        tokio::try_join!(cache.delete(&get), cache.delete(&head), ages.delete(url))?;
        Ok(())
    }

    async fn read_age(&self, url: &str) -> Option<i64> {
        let table = self.age_table().await.ok()?;
        match table.read::<AgeRecord>(url).await {
            Ok(record) => match self.clock.now_ms().checked_sub(record.age) {
                Some(age) if age >= 0 => Some(age),
                _ => {
                    tracing::debug!(group = %self.config.name, url = %url, stored = record.age, "age record out of range");
                    None
                }
            },
            Err(Error::RecordNotFound { .. }) => None,
            Err(e) => {
                tracing::debug!(group = %self.config.name, url = %url, error = %e, "unreadable age record");
                None
            }
        }
    }

    async fn safe_fetch(&self, req: &Request) -> Response {
        match self.fetcher.fetch(req).await {
            Ok(res) => res,
            Err(e) => {
                tracing::warn!(group = %self.config.name, url = %req.url, error = %e, "network fetch failed");
                Response::gateway_timeout()
            }
        }
    }

    /// Run `f` against the chain, loading it from the ledger on first use.
    async fn with_chain<R>(&self, f: impl FnOnce(&mut EvictionChain) -> R) -> R {
        let mut guard = self.lru.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_chain().await);
        }
        f(guard.get_or_insert_with(EvictionChain::new))
    }

    async fn load_chain(&self) -> EvictionChain {
        let table = match self.lru_table().await {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(group = %self.config.name, error = %e, "chain table unavailable, starting empty");
                return EvictionChain::new();
            }
        };

        match table.read::<EvictionChainState>(LRU_KEY).await {
            Ok(state) => EvictionChain::from_state(state).unwrap_or_else(|| {
                tracing::warn!(group = %self.config.name, "persisted chain is inconsistent, starting empty");
                EvictionChain::new()
            }),
            Err(Error::RecordNotFound { .. }) => EvictionChain::new(),
            Err(e) => {
                tracing::warn!(group = %self.config.name, error = %e, "failed to read chain, starting empty");
                EvictionChain::new()
            }
        }
    }

    /// Write the chain back to the ledger.
    ///
    /// The lock is held across the write so persisted states land in the
    /// same order as the mutations that produced them.
    async fn sync_chain(&self) -> Result<(), Error> {
        let guard = self.lru.lock().await;
        let Some(chain) = guard.as_ref() else {
            return Ok(());
        };
        self.lru_table().await?.write(LRU_KEY, chain.state()).await
    }

    async fn sync_chain_logged(&self) {
        if let Err(e) = self.sync_chain().await {
            tracing::warn!(group = %self.config.name, error = %e, "failed to persist chain");
        }
    }

    async fn cache(&self) -> Result<&ResponseCache, Error> {
        self.cache.get_or_try_init(|| self.db.open_cache(&self.names.cache)).await
    }

    async fn age_table(&self) -> Result<&Table, Error> {
        self.age_table.get_or_try_init(|| self.db.open_table(&self.names.age)).await
    }

    async fn lru_table(&self) -> Result<&Table, Error> {
        self.lru_table.get_or_try_init(|| self.db.open_table(&self.names.lru)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::network::testing::ScriptedFetch;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::{Duration, Instant};

    const START_MS: i64 = 1_700_000_000_000;

    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn new() -> Self {
            Self(AtomicI64::new(START_MS))
        }

        fn advance(&self, ms: i64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        group: Arc<CacheGroup>,
        fetcher: Arc<ScriptedFetch>,
        clock: Arc<ManualClock>,
        db: StoreDb,
        ctx: LifecycleContext,
    }

    impl Harness {
        async fn new(config: GroupConfig) -> Self {
            let db = StoreDb::open_in_memory().await.unwrap();
            Self::with_db(config, db)
        }

        fn with_db(config: GroupConfig, db: StoreDb) -> Self {
            let fetcher = Arc::new(ScriptedFetch::new());
            let clock = Arc::new(ManualClock::new());
            let group = Arc::new(CacheGroup::new(config, "test", db.clone(), fetcher.clone(), clock.clone()).unwrap());
            Self { group, fetcher, clock, db, ctx: LifecycleContext::new() }
        }

        async fn fetch(&self, req: Request) -> Response {
            self.group.handle_fetch(&req, &self.ctx).await.unwrap().unwrap()
        }

        async fn get(&self, url: &str) -> Response {
            self.fetch(Request::get(url)).await
        }

        async fn stored(&self, url: &str) -> Option<Response> {
            let cache = self.db.open_cache(&self.group.names.cache).await.unwrap();
            cache.match_request(&Request::get(url)).await.unwrap()
        }

        async fn age_record(&self, url: &str) -> Option<AgeRecord> {
            let table = self.db.open_table(&self.group.names.age).await.unwrap();
            table.read(url).await.ok()
        }
    }

    fn performance(max_size: usize, max_age_ms: u64) -> GroupConfig {
        GroupConfig {
            max_size,
            max_age_ms,
            ..GroupConfig::new("api", vec![r"^https://api\.test/".into()], Strategy::Performance)
        }
    }

    fn freshness(timeout_ms: Option<u64>) -> GroupConfig {
        GroupConfig {
            timeout_ms,
            ..GroupConfig::new("api", vec![r"^https://api\.test/".into()], Strategy::Freshness)
        }
    }

    const A: &str = "https://api.test/a";
    const B: &str = "https://api.test/b";
    const C: &str = "https://api.test/c";

    #[test]
    fn test_store_names() {
        let names = StoreNames::new("ngsw", "api");
        assert_eq!(names.cache, "ngsw:dynamic:api:cache");
        assert_eq!(names.age, "ngsw:dynamic:api:age");
        assert_eq!(names.lru, "ngsw:dynamic:api:lru");
    }

    #[tokio::test]
    async fn test_invalid_pattern_rejected() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let config = GroupConfig::new("api", vec!["(".into()], Strategy::Performance);
        let result = CacheGroup::new(config, "test", db, Arc::new(ScriptedFetch::new()), Arc::new(ManualClock::new()));
        assert!(matches!(result, Err(Error::InvalidPattern { .. })));
    }

    #[tokio::test]
    async fn test_unmatched_and_options_not_handled() {
        let h = Harness::new(performance(10, 1000)).await;

        let other = Request::get("https://other.test/a");
        assert!(h.group.handle_fetch(&other, &h.ctx).await.unwrap().is_none());

        let options = Request::new(Method::Options, A);
        assert!(h.group.handle_fetch(&options, &h.ctx).await.unwrap().is_none());
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_performance_hit_then_expiry() {
        let h = Harness::new(performance(10, 1000)).await;
        h.fetcher.respond(A, "a1");

        let res = h.get(A).await;
        assert_eq!(res.body.as_ref(), b"a1");
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.age_record(A).await, Some(AgeRecord { age: START_MS }));

        let res = h.get(A).await;
        assert_eq!(res.body.as_ref(), b"a1");
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.group.entries().await, vec![A.to_string()]);

        h.clock.advance(1001);
        h.fetcher.respond(A, "a2");
        let res = h.get(A).await;
        assert_eq!(res.body.as_ref(), b"a2");
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(h.age_record(A).await, Some(AgeRecord { age: START_MS + 1001 }));
    }

    #[tokio::test]
    async fn test_performance_age_at_limit_is_fresh() {
        let h = Harness::new(performance(10, 1000)).await;
        h.fetcher.respond(A, "a");
        h.get(A).await;

        h.clock.advance(1000);
        h.get(A).await;
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_performance_stale_entry_evicted_on_failed_refetch() {
        let h = Harness::new(performance(10, 1000)).await;
        h.fetcher.respond(A, "a");
        h.get(A).await;

        h.clock.advance(5000);
        h.fetcher.fail(A);
        let res = h.get(A).await;
        assert_eq!(res.status, 504);
        assert!(h.stored(A).await.is_none());
        assert!(h.age_record(A).await.is_none());
        assert!(h.group.is_empty().await);
    }

    #[tokio::test]
    async fn test_performance_timeout_returns_504_and_caches_later() {
        let config = GroupConfig { timeout_ms: Some(30), ..performance(10, 60_000) };
        let h = Harness::new(config).await;
        h.fetcher.respond_after(A, Duration::from_millis(200), "slow");

        let res = h.get(A).await;
        assert_eq!(res.status, 504);
        assert_eq!(res.status_text, "Gateway Timeout");
        assert_eq!(h.ctx.pending(), 1);

        h.ctx.settle().await;
        assert_eq!(h.stored(A).await.unwrap().body.as_ref(), b"slow");

        let res = h.get(A).await;
        assert_eq!(res.body.as_ref(), b"slow");
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_performance_fast_network_cached_inline() {
        let config = GroupConfig { timeout_ms: Some(2000), ..performance(10, 60_000) };
        let h = Harness::new(config).await;
        h.fetcher.respond(A, "fast");

        let res = h.get(A).await;
        assert_eq!(res.body.as_ref(), b"fast");
        assert_eq!(h.ctx.pending(), 0);
        assert_eq!(h.stored(A).await.unwrap().body.as_ref(), b"fast");
    }

    #[tokio::test]
    async fn test_performance_refresh_ahead() {
        let config = GroupConfig { refresh_ahead_ms: Some(100), ..performance(10, 1000) };
        let h = Harness::new(config).await;
        h.fetcher.respond(A, "v1");
        h.get(A).await;

        h.clock.advance(50);
        h.get(A).await;
        assert_eq!(h.ctx.pending(), 0);

        h.clock.advance(150);
        h.fetcher.respond(A, "v2");
        let res = h.get(A).await;
        assert_eq!(res.body.as_ref(), b"v1");

        h.ctx.settle().await;
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(h.stored(A).await.unwrap().body.as_ref(), b"v2");
        assert_eq!(h.age_record(A).await, Some(AgeRecord { age: START_MS + 200 }));
    }

    #[tokio::test]
    async fn test_error_responses_not_cached() {
        let h = Harness::new(performance(10, 1000)).await;
        h.fetcher.respond_with(A, Response::new(500, "Internal Server Error", "boom"));

        let res = h.get(A).await;
        assert_eq!(res.status, 500);
        assert!(h.stored(A).await.is_none());
        assert!(h.group.is_empty().await);
    }

    #[tokio::test]
    async fn test_freshness_timeout_serves_cache_then_updates() {
        let h = Harness::new(freshness(Some(50))).await;
        h.fetcher.respond(B, "old");
        assert_eq!(h.get(B).await.body.as_ref(), b"old");

        h.fetcher.respond_after(B, Duration::from_millis(500), "new");
        let started = Instant::now();
        let res = h.get(B).await;
        assert_eq!(res.body.as_ref(), b"old");
        assert!(started.elapsed() < Duration::from_millis(400));

        h.ctx.settle().await;
        assert_eq!(h.stored(B).await.unwrap().body.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_freshness_ignores_max_age_on_fallback() {
        let config = GroupConfig { max_age_ms: 10, ..freshness(Some(50)) };
        let h = Harness::new(config).await;
        h.fetcher.respond(B, "old");
        h.get(B).await;

        h.clock.advance(60_000);
        h.fetcher.fail(B);
        let res = h.get(B).await;
        assert_eq!(res.body.as_ref(), b"old");
        h.ctx.settle().await;
        assert_eq!(h.stored(B).await.unwrap().body.as_ref(), b"old");
    }

    #[tokio::test]
    async fn test_freshness_prefers_network() {
        let h = Harness::new(freshness(Some(1000))).await;
        h.fetcher.respond(B, "v1");
        h.get(B).await;
        h.fetcher.respond(B, "v2");

        let res = h.get(B).await;
        assert_eq!(res.body.as_ref(), b"v2");
        assert_eq!(h.stored(B).await.unwrap().body.as_ref(), b"v2");
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_freshness_slow_network_without_cache_blocks() {
        let h = Harness::new(freshness(Some(20))).await;
        h.fetcher.respond_after(B, Duration::from_millis(100), "eventually");

        let res = h.get(B).await;
        assert_eq!(res.body.as_ref(), b"eventually");
        assert_eq!(h.stored(B).await.unwrap().body.as_ref(), b"eventually");
        h.ctx.settle().await;
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_freshness_failure_without_cache_surfaces() {
        let h = Harness::new(freshness(None)).await;
        h.fetcher.fail(B);

        let result = h.group.handle_fetch(&Request::get(B), &h.ctx).await;
        assert!(matches!(result, Err(Error::Network(_))));
        h.ctx.settle().await;
    }

    #[tokio::test]
    async fn test_opaque_cached_only_by_freshness() {
        let h = Harness::new(freshness(None)).await;
        h.fetcher.respond_with(B, Response::opaque());
        h.get(B).await;
        assert_eq!(h.stored(B).await.unwrap().kind, ResponseKind::Opaque);

        let h = Harness::new(performance(10, 1000)).await;
        h.fetcher.respond_with(B, Response::opaque());
        h.get(B).await;
        assert!(h.stored(B).await.is_none());
    }

    #[tokio::test]
    async fn test_mutating_request_invalidates() {
        let h = Harness::new(performance(10, 60_000)).await;
        h.fetcher.respond(C, "c");
        h.get(C).await;
        h.fetch(Request::new(Method::Head, C)).await;
        assert!(h.stored(C).await.is_some());

        h.fetcher.respond_with(C, Response::new(201, "Created", "posted"));
        let res = h.fetch(Request::new(Method::Post, C).with_body("{}")).await;
        assert_eq!(res.status, 201);
        assert_eq!(h.fetcher.calls(), 3);

        assert!(h.stored(C).await.is_none());
        let cache = h.db.open_cache(&h.group.names.cache).await.unwrap();
        assert!(cache.match_request(&Request::new(Method::Head, C)).await.unwrap().is_none());
        assert!(h.age_record(C).await.is_none());
        assert!(h.group.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_mutating_request_always_hits_network() {
        let h = Harness::new(performance(10, 60_000)).await;
        h.fetcher.respond(C, "ok");

        h.fetch(Request::new(Method::Delete, C)).await;
        h.fetch(Request::new(Method::Put, C)).await;
        assert_eq!(h.fetcher.calls(), 2);
        assert!(h.stored(C).await.is_none());
    }

    #[tokio::test]
    async fn test_mutating_request_network_failure_is_504() {
        let h = Harness::new(performance(10, 60_000)).await;
        h.fetcher.fail(C);
        let res = h.fetch(Request::new(Method::Post, C)).await;
        assert_eq!(res.status, 504);
    }

    #[tokio::test]
    async fn test_cache_full_evicts_least_recent() {
        let h = Harness::new(performance(2, 60_000)).await;
        let [x, y, z] = ["https://api.test/x", "https://api.test/y", "https://api.test/z"];
        for url in [x, y, z] {
            h.fetcher.respond(url, "body");
            h.get(url).await;
        }

        assert_eq!(h.group.entries().await, vec![z.to_string(), y.to_string()]);
        assert!(h.stored(x).await.is_none());
        assert!(h.age_record(x).await.is_none());
        assert!(h.stored(y).await.is_some());
        assert!(h.stored(z).await.is_some());
    }

    #[tokio::test]
    async fn test_access_protects_from_eviction() {
        let h = Harness::new(performance(2, 60_000)).await;
        let [x, y, z] = ["https://api.test/x", "https://api.test/y", "https://api.test/z"];
        for url in [x, y, z] {
            h.fetcher.respond(url, "body");
        }

        h.get(x).await;
        h.get(y).await;
        h.get(x).await;
        h.get(z).await;

        assert_eq!(h.group.entries().await, vec![z.to_string(), x.to_string()]);
        assert!(h.stored(y).await.is_none());
        assert_eq!(h.fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_recaching_tracked_url_does_not_evict() {
        let h = Harness::new(GroupConfig { max_size: 2, ..freshness(None) }).await;
        h.fetcher.respond(A, "a");
        h.fetcher.respond(B, "b");

        for url in [A, B, A, B] {
            h.get(url).await;
        }
        assert_eq!(h.group.entries().await, vec![B.to_string(), A.to_string()]);
        assert!(h.stored(A).await.is_some());
        assert!(h.stored(B).await.is_some());
    }

    #[tokio::test]
    async fn test_chain_survives_restart() {
        let h = Harness::new(performance(10, 60_000)).await;
        for url in [A, B, C] {
            h.fetcher.respond(url, "body");
            h.get(url).await;
        }
        h.get(A).await;

        let restarted = Harness::with_db(performance(10, 60_000), h.db.clone());
        assert_eq!(restarted.group.entries().await, vec![A.to_string(), C.to_string(), B.to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_chain_starts_empty() {
        let h = Harness::new(performance(10, 60_000)).await;
        let lru = h.db.open_table(&h.group.names.lru).await.unwrap();
        lru.write(LRU_KEY, "garbage").await.unwrap();

        h.fetcher.respond(A, "a");
        assert_eq!(h.get(A).await.body.as_ref(), b"a");
        assert_eq!(h.group.entries().await, vec![A.to_string()]);
    }

    #[tokio::test]
    async fn test_missing_age_record_treated_as_expired() {
        let h = Harness::new(performance(10, 60_000)).await;
        h.fetcher.respond(A, "a1");
        h.get(A).await;

        let ages = h.db.open_table(&h.group.names.age).await.unwrap();
        ages.delete(A).await.unwrap();

        h.fetcher.respond(A, "a2");
        assert_eq!(h.get(A).await.body.as_ref(), b"a2");
        assert_eq!(h.fetcher.calls(), 2);
        assert!(h.age_record(A).await.is_some());
    }

    #[tokio::test]
    async fn test_out_of_range_age_record_treated_as_expired() {
        let h = Harness::new(performance(10, 60_000)).await;
        let ages = h.db.open_table(&h.group.names.age).await.unwrap();

        for stored in [i64::MIN, START_MS + 10_000] {
            h.fetcher.respond(A, "stale");
            h.get(A).await;
            ages.write(A, &AgeRecord { age: stored }).await.unwrap();

            h.fetcher.respond(A, "fresh");
            assert_eq!(h.get(A).await.body.as_ref(), b"fresh");
            assert_eq!(h.age_record(A).await, Some(AgeRecord { age: START_MS }));
        }
        assert_eq!(h.fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_huge_max_age_never_expires() {
        let config = GroupConfig { refresh_ahead_ms: Some(u64::MAX), ..performance(10, u64::MAX) };
        let h = Harness::new(config).await;
        h.fetcher.respond(A, "a");
        h.get(A).await;

        h.clock.advance(365 * 24 * 3_600_000);
        assert_eq!(h.get(A).await.body.as_ref(), b"a");
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.ctx.pending(), 0);
    }

    #[test]
    fn test_clamp_ms() {
        assert_eq!(clamp_ms(1_000), 1_000);
        assert_eq!(clamp_ms(u64::MAX), i64::MAX);
    }

    #[tokio::test]
    async fn test_cleanup_deletes_all_stores() {
        let h = Harness::new(performance(10, 60_000)).await;
        h.fetcher.respond(A, "a");
        h.get(A).await;

        h.group.cleanup().await.unwrap();
        h.group.cleanup().await.unwrap();

        assert!(h.stored(A).await.is_none());
        assert!(h.age_record(A).await.is_none());
        assert!(h.group.is_empty().await);

        h.get(A).await;
        assert_eq!(h.fetcher.calls(), 2);
    }
}
