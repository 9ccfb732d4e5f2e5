//! # swcache worker
//!
//! Offline request caching for a single web application, modelled on a
//! service worker.
//!
//! ## Features
//!
//! - **Classification**: ordered rule table mapping requests to route categories
//! - **Strategies**: cache-first, network-first, stale-while-revalidate, network-only
//! - **Lifecycle**: versioned precache at install, pruning at activate
//! - **Fallbacks**: offline document, fallback image, synthesized 503
//! - **Control**: `SKIP_WAITING` / `SYNC_NOW` messages, push notifications
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker
//!     ├── CacheLifecycleManager   install / activate
//!     ├── RequestClassifier       request → RouteCategory
//!     ├── StrategyExecutor        RouteCategory → Response
//!     │       └── FallbackResolver
//!     └── ControlChannel          messages → ClientRegistry
//!
//! CacheStore
//!     └── PartitionId → RequestKey → CacheEntry
//! ```

use serde::{Deserialize, Serialize};
use swcache_net::NetError;
use thiserror::Error;

pub mod classify;
pub mod config;
pub mod control;
pub mod fallback;
pub mod lifecycle;
pub mod logging;
pub mod manifest;
pub mod notify;
pub mod store;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;

pub use classify::{RequestClassifier, RouteCategory, RouteCondition, RouteRule};
pub use config::{PartitionNames, WorkerConfig};
pub use control::{Client, ClientMessage, ClientRegistry, ControlChannel, ControlMessage, ControlReply};
pub use fallback::FallbackResolver;
pub use lifecycle::{
    ActivateReport, CacheLifecycleManager, InstallError, InstallReport, ManifestFailure,
    PrecachePolicy,
};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use manifest::AssetManifest;
pub use notify::{NotificationConfig, NotificationRequest};
pub use store::{
    CacheEntry, CacheError, CacheStore, MemoryCacheStore, PartitionId, PartitionRole,
    PartitionSet, RequestKey, VersionTag,
};
pub use strategy::{Handled, ResponseSource, Strategy, StrategyExecutor, StrategyOverride, StrategyTable};
pub use worker::{FetchOutcome, ServiceWorker, WorkerEvent};

// ==================== Errors ====================

/// Errors that can occur in the worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to precache {url}: {reason}")]
    ManifestFetch { url: String, reason: String },

    #[error("Cache write failed: {0}")]
    CacheWrite(#[from] CacheError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cannot classify request: {0}")]
    Classification(String),

    #[error("No fallback available for {0}")]
    FallbackExhausted(String),

    #[error("Install failed: {0}")]
    Install(#[from] InstallError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ==================== State ====================

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Configured, nothing run yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Requests are only answered by an active worker.
    pub fn can_intercept_fetch(&self) -> bool {
        *self == ServiceWorkerState::Activated
    }
}
