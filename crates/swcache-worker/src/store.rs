//! Cache partitions and the storage seam.
//!
//! ```text
//! CacheStore
//!     ├── static-<version>   (precache, superseded on upgrade)
//!     ├── dynamic            (opportunistic, persists)
//!     └── api                (remote data, persists)
//!             └── RequestKey → CacheEntry
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use swcache_net::{Request, Response, ResponseType};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::config::PartitionNames;

/// Errors raised by a cache store.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Body error: {0}")]
    Body(String),
}

// ==================== Identities ====================

/// Identifier of one deployment of the application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named cache region. Versioned partitions are replaced wholesale on
/// upgrade; unversioned ones persist across versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    pub name: String,
    pub version: Option<VersionTag>,
}

impl PartitionId {
    pub fn versioned(name: impl Into<String>, version: VersionTag) -> Self {
        Self {
            name: name.into(),
            version: Some(version),
        }
    }

    pub fn persistent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}-{}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// Role a partition plays for the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionRole {
    Static,
    Dynamic,
    Api,
}

/// The partitions the current version reads, writes and keeps.
#[derive(Debug, Clone)]
pub struct PartitionSet {
    version: VersionTag,
    static_partition: PartitionId,
    dynamic: PartitionId,
    api: PartitionId,
}

impl PartitionSet {
    pub fn new(names: &PartitionNames, version: &VersionTag) -> Self {
        Self {
            version: version.clone(),
            static_partition: PartitionId::versioned(&names.static_prefix, version.clone()),
            dynamic: PartitionId::persistent(&names.dynamic),
            api: PartitionId::persistent(&names.api),
        }
    }

    pub fn version(&self) -> &VersionTag {
        &self.version
    }

    pub fn get(&self, role: PartitionRole) -> &PartitionId {
        match role {
            PartitionRole::Static => &self.static_partition,
            PartitionRole::Dynamic => &self.dynamic,
            PartitionRole::Api => &self.api,
        }
    }

    /// Partitions that survive activation of this version.
    pub fn keep(&self) -> [&PartitionId; 3] {
        [&self.static_partition, &self.dynamic, &self.api]
    }

    pub fn contains(&self, partition: &PartitionId) -> bool {
        self.keep().contains(&partition)
    }
}

/// Cache key: method plus normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Key for a GET of `url`. Fragments never reach the network, so they
    /// are not part of the identity.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET.to_string(),
            url: url.into(),
        }
    }

    /// Key for a request, if it is cacheable at all (GET only).
    pub fn for_request(request: &Request) -> Option<Self> {
        (request.method == Method::GET).then(|| Self::get(&request.url))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ==================== Entries ====================

/// A stored request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub url: Option<String>,
    pub status: u16,
    pub status_text: String,
    /// Header lines in order, repeated names kept, values as raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,
    pub response_type: ResponseType,
    pub body: Bytes,
    /// Stored at timestamp (ms since epoch).
    pub stored_at: u64,
}

impl CacheEntry {
    /// Capture a response whose body is already loaded.
    ///
    /// Streaming responses are rejected: reading them here would starve the
    /// caller. Duplicate them first.
    pub fn from_response(key: RequestKey, response: &Response) -> Result<Self, CacheError> {
        let body = response
            .body_bytes()
            .cloned()
            .ok_or_else(|| CacheError::Body(format!("{key}: body is still streaming")))?;

        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Ok(Self {
            key,
            url: response.url.as_ref().map(|u| u.to_string()),
            status: response.status,
            status_text: response.status_text.clone(),
            headers,
            response_type: response.response_type,
            body,
            stored_at: now_millis(),
        })
    }

    /// Rebuild a response from the stored entry.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                headers.append(n, v);
            }
        }

        let mut response = Response::new(self.status, self.body.clone())
            .with_type(self.response_type)
            .with_status_text(self.status_text.clone());
        response.headers = headers;
        response.url = self.url.as_deref().and_then(|u| Url::parse(u).ok());
        response
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Store ====================

/// Persistent, partitioned request → response storage.
///
/// Writers to the same key race freely; the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a partition, creating it if absent.
    async fn open(&self, partition: &PartitionId) -> Result<(), CacheError>;

    /// All existing partitions.
    async fn partitions(&self) -> Result<Vec<PartitionId>, CacheError>;

    /// Delete a partition. Returns whether it existed.
    async fn delete(&self, partition: &PartitionId) -> Result<bool, CacheError>;

    /// Look up a key. A missing partition is a miss, not an error.
    async fn lookup(
        &self,
        partition: &PartitionId,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, creating the partition if absent.
    async fn put(&self, partition: &PartitionId, entry: CacheEntry) -> Result<(), CacheError>;

    /// Keys stored in a partition.
    async fn keys(&self, partition: &PartitionId) -> Result<Vec<RequestKey>, CacheError>;
}

/// A single partition held in memory.
#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add entry.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<RequestKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<PartitionId, Cache>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, partition: &PartitionId) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        if !caches.contains_key(partition) {
            debug!(partition = %partition, "Creating partition");
            caches.insert(partition.clone(), Cache::default());
        }
        Ok(())
    }

    async fn partitions(&self) -> Result<Vec<PartitionId>, CacheError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete(&self, partition: &PartitionId) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(partition).is_some())
    }

    async fn lookup(
        &self,
        partition: &PartitionId,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(partition)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn put(&self, partition: &PartitionId, entry: CacheEntry) -> Result<(), CacheError> {
        trace!(partition = %partition, key = %entry.key, "Storing entry");
        self.caches
            .write()
            .await
            .entry(partition.clone())
            .or_default()
            .put(entry);
        Ok(())
    }

    async fn keys(&self, partition: &PartitionId) -> Result<Vec<RequestKey>, CacheError> {
        self.caches
            .read()
            .await
            .get(partition)
            .map(Cache::keys)
            .ok_or_else(|| CacheError::PartitionNotFound(partition.to_string()))
    }
}
