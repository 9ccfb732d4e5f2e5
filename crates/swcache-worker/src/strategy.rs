//! Cache strategies.
//!
//! The executor keeps no state between requests. A network fetch that may
//! end in a cache write runs in its own task together with that write: the
//! caller only waits for the response, so dropping the caller cancels
//! neither. The task handles travel with the [`Handled`] result so callers
//! may wait for the writes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use swcache_net::{Fetcher, NetError, Request, Response, UrlPattern};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::classify::RouteCategory;
use crate::fallback::FallbackResolver;
use crate::store::{CacheEntry, CacheStore, PartitionId, PartitionRole, PartitionSet, RequestKey};
use crate::WorkerError;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
}

impl Strategy {
    /// Strategy bound to a category when no override applies.
    pub fn default_for(category: RouteCategory) -> Self {
        match category {
            RouteCategory::Document => Strategy::NetworkFirst,
            RouteCategory::StaticAsset => Strategy::CacheFirst,
            RouteCategory::ApiCall => Strategy::NetworkFirst,
            RouteCategory::CrossOrigin => Strategy::NetworkOnly,
            RouteCategory::Other => Strategy::StaleWhileRevalidate,
        }
    }
}

/// Partition a category writes to. Reads check the current static
/// partition first.
pub fn target_role(category: RouteCategory) -> PartitionRole {
    match category {
        RouteCategory::ApiCall => PartitionRole::Api,
        _ => PartitionRole::Dynamic,
    }
}

/// Forces a strategy for matching URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyOverride {
    pub pattern: UrlPattern,
    pub strategy: Strategy,
}

/// Category defaults plus ordered URL overrides.
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    overrides: Vec<StrategyOverride>,
}

impl StrategyTable {
    pub fn new(overrides: Vec<StrategyOverride>) -> Self {
        Self { overrides }
    }

    pub fn resolve(&self, request: &Request, category: RouteCategory) -> Strategy {
        self.overrides
            .iter()
            .find(|o| o.pattern.matches(&request.url))
            .map(|o| o.strategy)
            .unwrap_or_else(|| Strategy::default_for(category))
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    Fallback,
}

/// A response plus the background cache work it started.
#[derive(Debug)]
pub struct Handled {
    pub response: Response,
    pub strategy: Strategy,
    pub source: ResponseSource,
    background: Vec<JoinHandle<()>>,
}

impl Handled {
    fn new(response: Response, strategy: Strategy, source: ResponseSource) -> Self {
        Self {
            response,
            strategy,
            source,
            background: Vec::new(),
        }
    }

    fn with_background(mut self, handle: JoinHandle<()>) -> Self {
        self.background.push(handle);
        self
    }

    pub fn has_background_work(&self) -> bool {
        !self.background.is_empty()
    }

    /// Return the response; background work keeps running.
    pub fn into_response(self) -> Response {
        self.response
    }

    /// Wait for background cache work, then return the response.
    pub async fn settled(self) -> Response {
        for handle in self.background {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background cache task panicked");
            }
        }
        self.response
    }
}

/// Runs strategies against the cache store and the network.
pub struct StrategyExecutor {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    partitions: PartitionSet,
    table: StrategyTable,
    fallback: FallbackResolver,
}

impl StrategyExecutor {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        partitions: PartitionSet,
        table: StrategyTable,
        fallback: FallbackResolver,
    ) -> Self {
        Self {
            store,
            fetcher,
            partitions,
            table,
            fallback,
        }
    }

    /// Serve a request with the strategy bound to its category.
    pub async fn execute(&self, request: &Request, category: RouteCategory) -> Handled {
        let strategy = self.table.resolve(request, category);
        self.execute_with(request, category, strategy).await
    }

    /// Serve a request with an explicit strategy.
    pub async fn execute_with(
        &self,
        request: &Request,
        category: RouteCategory,
        strategy: Strategy,
    ) -> Handled {
        debug!(url = %request.url, ?category, ?strategy, "Executing strategy");

        let key = match RequestKey::for_request(request) {
            Some(key) => key,
            None => return self.network_only(request).await,
        };
        let target = self.partitions.get(target_role(category)).clone();

        match strategy {
            Strategy::CacheFirst => self.cache_first(request, key, target).await,
            Strategy::NetworkFirst => {
                self.network_first(request, key, target, Strategy::NetworkFirst)
                    .await
            }
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, key, target).await
            }
            Strategy::NetworkOnly => self.network_only(request).await,
        }
    }

    async fn cache_first(&self, request: &Request, key: RequestKey, target: PartitionId) -> Handled {
        let strategy = Strategy::CacheFirst;
        if let Some(entry) = self.lookup(&key, &target).await {
            trace!(key = %key, "Cache hit");
            return Handled::new(entry.to_response(), strategy, ResponseSource::Cache);
        }

        match self.fetch_and_store(request, key, target, strategy).await {
            Ok(handled) => handled,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network failed on cache miss");
                self.fall_back(request, strategy).await
            }
        }
    }

    async fn network_first(
        &self,
        request: &Request,
        key: RequestKey,
        target: PartitionId,
        strategy: Strategy,
    ) -> Handled {
        match self
            .fetch_and_store(request, key.clone(), target.clone(), strategy)
            .await
        {
            Ok(handled) => handled,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.lookup(&key, &target).await {
                    Some(entry) => Handled::new(entry.to_response(), strategy, ResponseSource::Cache),
                    None => self.fall_back(request, strategy).await,
                }
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &Request,
        key: RequestKey,
        target: PartitionId,
    ) -> Handled {
        let strategy = Strategy::StaleWhileRevalidate;
        match self.lookup(&key, &target).await {
            Some(entry) => {
                let refresh = self.spawn_revalidate(request.clone(), key, target);
                Handled::new(entry.to_response(), strategy, ResponseSource::Cache)
                    .with_background(refresh)
            }
            None => self.network_first(request, key, target, strategy).await,
        }
    }

    async fn network_only(&self, request: &Request) -> Handled {
        let strategy = Strategy::NetworkOnly;
        match self.fetcher.fetch(request).await {
            Ok(response) => Handled::new(response, strategy, ResponseSource::Network),
            Err(e) => {
                let error = WorkerError::Network(e);
                debug!(url = %request.url, error = %error, "Network-only fetch failed");
                Handled::new(Response::network_error(), strategy, ResponseSource::Network)
            }
        }
    }

    async fn fall_back(&self, request: &Request, strategy: Strategy) -> Handled {
        Handled::new(
            self.fallback.resolve(request).await,
            strategy,
            ResponseSource::Fallback,
        )
    }

    /// Fetch; when the response is cacheable, split it and store one half.
    async fn fetch_and_store(
        &self,
        request: &Request,
        key: RequestKey,
        target: PartitionId,
        strategy: Strategy,
    ) -> Result<Handled, NetError> {
        let (reply, fetched) = oneshot::channel();
        let task = self.spawn_fetch(request.clone(), key, target, reply);

        match fetched.await {
            Ok(Ok(Fetched { response, caching })) => {
                let handled = Handled::new(response, strategy, ResponseSource::Network);
                Ok(if caching {
                    handled.with_background(task)
                } else {
                    handled
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NetError::RequestFailed(format!(
                "fetch task for {} ended without a response",
                request.url
            ))),
        }
    }

    /// Consult the current precache, then the target partition.
    async fn lookup(&self, key: &RequestKey, target: &PartitionId) -> Option<CacheEntry> {
        let precache = self.partitions.get(PartitionRole::Static);
        let mut partitions = vec![precache];
        if target != precache {
            partitions.push(target);
        }

        for partition in partitions {
            match self.store.lookup(partition, key).await {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(e) => warn!(partition = %partition, key = %key, error = %e, "Cache read failed"),
            }
        }
        None
    }

    /// The fetch, the split and the write run here, outside the caller's
    /// future. The response half goes back over `reply` before the write.
    fn spawn_fetch(
        &self,
        request: Request,
        key: RequestKey,
        partition: PartitionId,
        reply: oneshot::Sender<Result<Fetched, NetError>>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        tokio::spawn(async move {
            let response = match fetcher.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                }
            };
            if !response.is_cacheable() {
                trace!(url = %request.url, status = response.status, "Not caching response");
                let _ = reply.send(Ok(Fetched {
                    response,
                    caching: false,
                }));
                return;
            }

            let (response, copy) = match response.duplicate().await {
                Ok(halves) => halves,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                }
            };
            let sent = reply.send(Ok(Fetched {
                response,
                caching: true,
            }));
            if sent.is_err() {
                debug!(url = %request.url, "Caller went away, caching anyway");
            }
            store_response(store.as_ref(), &partition, key, &copy).await;
        })
    }

    fn spawn_revalidate(&self, request: Request, key: RequestKey, partition: PartitionId) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        tokio::spawn(async move {
            let fresh = match fetcher.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Revalidation failed");
                    return;
                }
            };
            if !fresh.is_cacheable() {
                trace!(url = %request.url, status = fresh.status, "Revalidation response not cacheable");
                return;
            }
            match fresh.materialize().await {
                Ok(fresh) => store_response(store.as_ref(), &partition, key, &fresh).await,
                Err(e) => debug!(url = %request.url, error = %e, "Revalidation body failed"),
            }
        })
    }
}

/// What a fetch task hands back to the waiting caller.
struct Fetched {
    response: Response,
    /// A write of the other half follows.
    caching: bool,
}

/// Write a loaded response; failures are logged, never raised.
async fn store_response(
    store: &dyn CacheStore,
    partition: &PartitionId,
    key: RequestKey,
    response: &Response,
) {
    let result = match CacheEntry::from_response(key.clone(), response) {
        Ok(entry) => store.put(partition, entry).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => trace!(partition = %partition, key = %key, "Cached response"),
        Err(e) => {
            let error = WorkerError::CacheWrite(e);
            warn!(partition = %partition, key = %key, error = %error, "Cache write dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionNames;
    use crate::store::{MemoryCacheStore, VersionTag};
    use crate::testing::{FailingStore, StubFetcher};
    use bytes::Bytes;
    use swcache_net::{Destination, ResponseType};
    use url::Url;

    const APP: &str = "https://app.test";

    fn url(path: &str) -> Url {
        Url::parse(APP).unwrap().join(path).unwrap()
    }

    fn partitions() -> PartitionSet {
        PartitionSet::new(&PartitionNames::default(), &VersionTag::new("v1"))
    }

    fn executor(store: Arc<dyn CacheStore>, fetcher: Arc<StubFetcher>) -> StrategyExecutor {
        let partitions = partitions();
        let fallback = FallbackResolver::new(
            Arc::clone(&store),
            partitions.get(PartitionRole::Static).clone(),
            Some(RequestKey::get(&url("/offline.html"))),
            None,
        );
        StrategyExecutor::new(store, fetcher, partitions, StrategyTable::default(), fallback)
    }

    async fn seed(store: &MemoryCacheStore, role: PartitionRole, path: &str, body: &str) {
        let key = RequestKey::get(&url(path));
        let entry = CacheEntry::from_response(key, &Response::new(200, body.to_string())).unwrap();
        store.put(partitions().get(role), entry).await.unwrap();
    }

    async fn cached_body(store: &MemoryCacheStore, role: PartitionRole, path: &str) -> Option<Bytes> {
        store
            .lookup(partitions().get(role), &RequestKey::get(&url(path)))
            .await
            .unwrap()
            .map(|e| e.body)
    }

    #[test]
    fn test_default_strategies() {
        assert_eq!(Strategy::default_for(RouteCategory::Document), Strategy::NetworkFirst);
        assert_eq!(Strategy::default_for(RouteCategory::StaticAsset), Strategy::CacheFirst);
        assert_eq!(Strategy::default_for(RouteCategory::ApiCall), Strategy::NetworkFirst);
        assert_eq!(Strategy::default_for(RouteCategory::CrossOrigin), Strategy::NetworkOnly);
    }

    #[test]
    fn test_override_beats_category() {
        let table = StrategyTable::new(vec![StrategyOverride {
            pattern: UrlPattern::path_prefix("/data/"),
            strategy: Strategy::NetworkFirst,
        }]);
        let page = Request::get(url("/data/standings.html"));
        assert_eq!(table.resolve(&page, RouteCategory::Other), Strategy::NetworkFirst);
        let other = Request::get(url("/about"));
        assert_eq!(table.resolve(&other, RouteCategory::Other), Strategy::StaleWhileRevalidate);
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let store = Arc::new(MemoryCacheStore::new());
        seed(&store, PartitionRole::Static, "/app.css", "cached css").await;
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/app.css", 200, "network css");
        let exec = executor(store.clone(), fetcher.clone());

        let req = Request::get(url("/app.css")).destination(Destination::Style);
        let handled = exec.execute(&req, RouteCategory::StaticAsset).await;

        assert_eq!(handled.source, ResponseSource::Cache);
        assert_eq!(handled.into_response().text().await.unwrap(), "cached css");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond_streaming("/app.js", 200, &["console.", "log(1)"]);
        let exec = executor(store.clone(), fetcher.clone());

        let req = Request::get(url("/app.js")).destination(Destination::Script);
        let handled = exec.execute(&req, RouteCategory::StaticAsset).await;
        assert_eq!(handled.source, ResponseSource::Network);
        assert!(handled.has_background_work());

        let response = handled.settled().await;
        assert_eq!(response.text().await.unwrap(), "console.log(1)");
        assert_eq!(
            cached_body(&store, PartitionRole::Dynamic, "/app.js").await.unwrap().as_ref(),
            b"console.log(1)"
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_dropped_caller_still_caches() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(StubFetcher::gated());
        fetcher.respond("/app.js", 200, "console.log(2)");
        let exec = Arc::new(executor(store.clone(), fetcher.clone()));

        let caller = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                let req = Request::get(url("/app.js")).destination(Destination::Script);
                exec.execute(&req, RouteCategory::StaticAsset).await
            })
        };
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        fetcher.release(1);
        let mut cached = None;
        for _ in 0..100 {
            cached = cached_body(&store, PartitionRole::Dynamic, "/app.js").await;
            if cached.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cached.unwrap().as_ref(), b"console.log(2)");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_precache_wins_over_runtime_entry() {
        let store = Arc::new(MemoryCacheStore::new());
        seed(&store, PartitionRole::Dynamic, "/app.js", "runtime js").await;
        seed(&store, PartitionRole::Static, "/app.js", "precached js").await;
        let fetcher = Arc::new(StubFetcher::new());
        let exec = executor(store, fetcher.clone());

        let req = Request::get(url("/app.js")).destination(Destination::Script);
        let handled = exec.execute(&req, RouteCategory::StaticAsset).await;
        assert_eq!(handled.source, ResponseSource::Cache);
        assert_eq!(handled.into_response().text().await.unwrap(), "precached js");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_uncacheable_responses_are_returned_not_stored() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/missing.png", 404, "nope");
        fetcher.respond_with("/opaque.js", || {
            Response::opaque(Url::parse("https://cdn.test/opaque.js").unwrap())
        });
        let exec = executor(store.clone(), fetcher.clone());

        let missing = exec
            .execute(&Request::get(url("/missing.png")), RouteCategory::StaticAsset)
            .await;
        assert!(!missing.has_background_work());
        assert_eq!(missing.response.status, 404);

        let opaque = exec
            .execute(&Request::get(url("/opaque.js")), RouteCategory::StaticAsset)
            .await;
        assert_eq!(opaque.response.response_type, ResponseType::Opaque);
        assert!(!opaque.has_background_work());

        assert!(cached_body(&store, PartitionRole::Dynamic, "/missing.png").await.is_none());
        assert!(cached_body(&store, PartitionRole::Dynamic, "/opaque.js").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_first_network_failure_falls_back() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        let exec = executor(store, fetcher);

        let handled = exec
            .execute(&Request::get(url("/font.woff2")).destination(Destination::Font), RouteCategory::StaticAsset)
            .await;
        assert_eq!(handled.source, ResponseSource::Fallback);
        assert_eq!(handled.response.status, 503);
    }

    #[tokio::test]
    async fn test_network_first_updates_cache() {
        let store = Arc::new(MemoryCacheStore::new());
        seed(&store, PartitionRole::Api, "/rest/v1/races", "old").await;
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/rest/v1/races", 200, "fresh");
        let exec = executor(store.clone(), fetcher);

        let response = exec
            .execute(&Request::get(url("/rest/v1/races")), RouteCategory::ApiCall)
            .await
            .settled()
            .await;

        assert_eq!(response.text().await.unwrap(), "fresh");
        assert_eq!(
            cached_body(&store, PartitionRole::Api, "/rest/v1/races").await.unwrap().as_ref(),
            b"fresh"
        );
    }

    #[tokio::test]
    async fn test_network_first_failure_serves_cache() {
        let store = Arc::new(MemoryCacheStore::new());
        seed(&store, PartitionRole::Api, "/rest/v1/races", "previous").await;
        let exec = executor(store, Arc::new(StubFetcher::new()));

        let handled = exec
            .execute(&Request::get(url("/rest/v1/races")), RouteCategory::ApiCall)
            .await;
        assert_eq!(handled.source, ResponseSource::Cache);
        assert_eq!(handled.into_response().text().await.unwrap(), "previous");
    }

    #[tokio::test]
    async fn test_broken_body_counts_as_network_failure() {
        let store = Arc::new(MemoryCacheStore::new());
        seed(&store, PartitionRole::Dynamic, "/page.html", "cached page").await;
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond_with("/page.html", || {
            let (tx, rx) = tokio::sync::mpsc::channel(2);
            tx.try_send(Ok(Bytes::from_static(b"<html"))).unwrap();
            tx.try_send(Err(NetError::Body("connection reset".into()))).unwrap();
            Response::streaming(200, rx)
        });
        let exec = executor(store, fetcher);

        let handled = exec
            .execute(&Request::navigate(url("/page.html")), RouteCategory::Document)
            .await;
        assert_eq!(handled.source, ResponseSource::Cache);
        assert_eq!(handled.into_response().text().await.unwrap(), "cached page");
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_eventual_consistency() {
        let store = Arc::new(MemoryCacheStore::new());
        seed(&store, PartitionRole::Dynamic, "/manifest.json", "stale").await;
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/manifest.json", 200, "fresh");
        let exec = executor(store.clone(), fetcher.clone());

        let req = Request::get(url("/manifest.json"));
        let handled = exec
            .execute_with(&req, RouteCategory::Other, Strategy::StaleWhileRevalidate)
            .await;
        assert_eq!(handled.source, ResponseSource::Cache);
        let immediate = handled.settled().await;
        assert_eq!(immediate.text().await.unwrap(), "stale");

        let next = exec
            .execute_with(&req, RouteCategory::Other, Strategy::CacheFirst)
            .await;
        assert_eq!(next.into_response().text().await.unwrap(), "fresh");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_refresh_failure_keeps_entry() {
        let store = Arc::new(MemoryCacheStore::new());
        seed(&store, PartitionRole::Dynamic, "/manifest.json", "stale").await;
        let exec = executor(store.clone(), Arc::new(StubFetcher::new()));

        let response = exec
            .execute_with(&Request::get(url("/manifest.json")), RouteCategory::Other, Strategy::StaleWhileRevalidate)
            .await
            .settled()
            .await;
        assert_eq!(response.text().await.unwrap(), "stale");
        assert_eq!(
            cached_body(&store, PartitionRole::Dynamic, "/manifest.json").await.unwrap().as_ref(),
            b"stale"
        );
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_miss_awaits_network() {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/about", 200, "about");
        let exec = executor(store.clone(), fetcher);

        let handled = exec
            .execute_with(&Request::get(url("/about")), RouteCategory::Other, Strategy::StaleWhileRevalidate)
            .await;
        assert_eq!(handled.source, ResponseSource::Network);
        assert_eq!(handled.settled().await.text().await.unwrap(), "about");
        assert!(cached_body(&store, PartitionRole::Dynamic, "/about").await.is_some());
    }

    #[tokio::test]
    async fn test_network_only_never_touches_cache() {
        let store = Arc::new(FailingStore::default());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/live", 200, "live");
        let exec = executor(store.clone(), fetcher);

        let ok = exec
            .execute_with(&Request::get(url("/live")), RouteCategory::Other, Strategy::NetworkOnly)
            .await;
        assert_eq!(ok.into_response().text().await.unwrap(), "live");

        let failed = exec
            .execute_with(&Request::get(url("/down")), RouteCategory::Other, Strategy::NetworkOnly)
            .await;
        assert!(failed.response.is_network_error());
        assert_eq!(store.operations(), 0);
    }

    #[tokio::test]
    async fn test_non_get_bypasses_cache() {
        let store = Arc::new(FailingStore::default());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/form", 200, "posted");
        let exec = executor(store.clone(), fetcher);

        let post = Request::post(url("/form"), Bytes::from_static(b"a=1"));
        let handled = exec.execute(&post, RouteCategory::Other).await;
        assert_eq!(handled.strategy, Strategy::NetworkOnly);
        assert_eq!(store.operations(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_never_blocks_response() {
        let store = Arc::new(FailingStore::default());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/app.css", 200, "css");
        let exec = executor(store.clone(), fetcher);

        let response = exec
            .execute(&Request::get(url("/app.css")), RouteCategory::StaticAsset)
            .await
            .settled()
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.text().await.unwrap(), "css");
        assert!(store.operations() > 0);
    }
}
