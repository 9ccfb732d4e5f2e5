//! Test doubles for the network and the store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use swcache_net::{Fetcher, NetError, Request, Response};
use tokio::sync::{mpsc, Semaphore};

use crate::store::{CacheEntry, CacheError, CacheStore, PartitionId, RequestKey};

type Responder = Arc<dyn Fn() -> Response + Send + Sync>;

/// Fetcher answering from a table keyed by URL path. Unknown paths fail
/// as unreachable.
#[derive(Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, Responder>>,
    requests: Mutex<Vec<Request>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch is counted, then waits for a [`release`](Self::release).
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self, fetches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(fetches);
        }
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        let body = Bytes::copy_from_slice(body.as_bytes());
        self.respond_with(path, move || Response::new(status, body.clone()));
    }

    pub fn respond_streaming(&self, path: &str, status: u16, chunks: &[&str]) {
        let chunks: Vec<Bytes> = chunks
            .iter()
            .map(|c| Bytes::copy_from_slice(c.as_bytes()))
            .collect();
        self.respond_with(path, move || {
            let (tx, rx) = mpsc::channel(chunks.len().max(1));
            for chunk in &chunks {
                tx.try_send(Ok(chunk.clone())).unwrap();
            }
            Response::streaming(status, rx)
        });
    }

    pub fn respond_with(&self, path: &str, responder: impl Fn() -> Response + Send + Sync + 'static) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::new(responder));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let responder = self.routes.lock().unwrap().get(request.url.path()).cloned();
        match responder {
            Some(responder) => Ok(responder().with_url(request.url.clone())),
            None => Err(NetError::Unreachable(request.url.to_string())),
        }
    }
}

/// Store whose every operation fails.
#[derive(Default)]
pub struct FailingStore {
    operations: AtomicUsize,
}

impl FailingStore {
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, CacheError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Storage("disk full".into()))
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn open(&self, _partition: &PartitionId) -> Result<(), CacheError> {
        self.fail()
    }

    async fn partitions(&self) -> Result<Vec<PartitionId>, CacheError> {
        self.fail()
    }

    async fn delete(&self, _partition: &PartitionId) -> Result<bool, CacheError> {
        self.fail()
    }

    async fn lookup(
        &self,
        _partition: &PartitionId,
        _key: &RequestKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        self.fail()
    }

    async fn put(&self, _partition: &PartitionId, _entry: CacheEntry) -> Result<(), CacheError> {
        self.fail()
    }

    async fn keys(&self, _partition: &PartitionId) -> Result<Vec<RequestKey>, CacheError> {
        self.fail()
    }
}
