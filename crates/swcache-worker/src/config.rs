//! Worker configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use swcache_net::UrlPattern;
use url::Url;

use crate::lifecycle::PrecachePolicy;
use crate::manifest::AssetManifest;
use crate::notify::NotificationConfig;
use crate::store::VersionTag;
use crate::strategy::{Strategy, StrategyOverride};
use crate::WorkerError;

/// Configuration for one deployed version of the application.
///
/// Only `origin` is required; every other field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Deployment version; selects the static partition.
    #[serde(default = "default_version")]
    pub version: VersionTag,

    /// The application's own origin. Relative manifest and fallback URLs
    /// resolve against it.
    pub origin: Url,

    /// Partition names
    #[serde(default)]
    pub partitions: PartitionNames,

    /// Assets to precache at install
    #[serde(default)]
    pub manifest: AssetManifest,

    /// Remote data hosts; a domain also covers its subdomains.
    #[serde(default)]
    pub api_hosts: Vec<String>,

    /// Same-origin path prefixes served by the data API.
    #[serde(default = "default_api_path_prefixes")]
    pub api_path_prefixes: Vec<String>,

    /// Per-page HTML routes requested without a document destination.
    #[serde(default = "default_document_patterns")]
    pub document_patterns: Vec<UrlPattern>,

    /// Explicit strategy overrides, checked before the category default.
    #[serde(default = "default_strategy_overrides")]
    pub strategy_overrides: Vec<StrategyOverride>,

    /// Precached page served to navigations when offline.
    #[serde(default = "default_offline_document")]
    pub offline_document: Option<String>,

    /// Precached image served to image requests when offline.
    #[serde(default = "default_fallback_image")]
    pub fallback_image: Option<String>,

    /// Activate as soon as install completes instead of waiting for
    /// existing clients to go away.
    #[serde(default = "default_true")]
    pub skip_waiting_on_install: bool,

    /// What a failed required precache entry means for install.
    #[serde(default)]
    pub precache_policy: PrecachePolicy,

    /// Background sync tags the worker recognizes.
    #[serde(default = "default_sync_tags")]
    pub sync_tags: Vec<String>,

    /// Push notification defaults
    #[serde(default)]
    pub notification: NotificationConfig,
}

/// Names of the cache partitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionNames {
    /// Prefix of the versioned precache partition (`<prefix>-<version>`).
    pub static_prefix: String,
    /// Opportunistically cached non-manifest resources.
    pub dynamic: String,
    /// Remote data responses kept for offline reads.
    pub api: String,
}

fn default_version() -> VersionTag {
    VersionTag::new("v1")
}

fn default_api_path_prefixes() -> Vec<String> {
    vec!["/rest/v1/".to_string()]
}

fn default_document_patterns() -> Vec<UrlPattern> {
    vec![UrlPattern::path_suffix(".html")]
}

fn default_strategy_overrides() -> Vec<StrategyOverride> {
    vec![StrategyOverride {
        pattern: UrlPattern::path_prefix("/data/"),
        strategy: Strategy::NetworkFirst,
    }]
}

fn default_offline_document() -> Option<String> {
    Some("./offline.html".to_string())
}

fn default_fallback_image() -> Option<String> {
    Some("./logo.png".to_string())
}

fn default_true() -> bool {
    true
}

fn default_sync_tags() -> Vec<String> {
    vec!["sync-races".to_string()]
}

impl Default for PartitionNames {
    fn default() -> Self {
        Self {
            static_prefix: "static".to_string(),
            dynamic: "dynamic".to_string(),
            api: "api".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Configuration for an app served from `origin`, every other field at
    /// its default.
    pub fn new(origin: Url) -> Self {
        Self {
            version: default_version(),
            origin,
            partitions: PartitionNames::default(),
            manifest: AssetManifest::default(),
            api_hosts: Vec::new(),
            api_path_prefixes: default_api_path_prefixes(),
            document_patterns: default_document_patterns(),
            strategy_overrides: default_strategy_overrides(),
            offline_document: default_offline_document(),
            fallback_image: default_fallback_image(),
            skip_waiting_on_install: default_true(),
            precache_policy: PrecachePolicy::default(),
            sync_tags: default_sync_tags(),
            notification: NotificationConfig::default(),
        }
    }

    /// Parse a JSON configuration. Missing fields other than `origin` take
    /// their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, WorkerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| WorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorkerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.version.as_str().trim().is_empty() {
            return Err(WorkerError::Config("version must not be empty".into()));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(WorkerError::Config(format!(
                "origin must be http(s): {}",
                self.origin
            )));
        }
        for (field, value) in [
            ("offline_document", &self.offline_document),
            ("fallback_image", &self.fallback_image),
        ] {
            if let Some(value) = value {
                if self.resolve(value).is_none() {
                    return Err(WorkerError::Config(format!("{field} is not a valid URL: {value}")));
                }
            }
        }
        let names = &self.partitions;
        if names.dynamic == names.api {
            return Err(WorkerError::Config(
                "dynamic and api partitions must have distinct names".into(),
            ));
        }
        Ok(())
    }

    /// Resolve a possibly relative URL against the origin. Only http(s)
    /// results are accepted.
    pub fn resolve(&self, value: &str) -> Option<Url> {
        resolve_against(&self.origin, value)
    }
}

pub(crate) fn resolve_against(base: &Url, value: &str) -> Option<Url> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    base.join(value)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}
