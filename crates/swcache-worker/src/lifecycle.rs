//! Install-time population and activate-time pruning of partitions.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use swcache_net::{Fetcher, Request, RequestMode};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::control::ClientRegistry;
use crate::manifest::{AssetManifest, ManifestEntry};
use crate::store::{
    CacheEntry, CacheError, CacheStore, PartitionId, PartitionRole, PartitionSet, RequestKey,
    VersionTag,
};
use crate::WorkerError;

/// How install treats failed `required` manifest entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrecachePolicy {
    /// Record the failure, install anyway.
    #[default]
    BestEffort,
    /// Fail the install.
    Strict,
}

/// Errors that fail an install.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to open partition {partition}: {source}")]
    Open {
        partition: String,
        #[source]
        source: CacheError,
    },

    #[error("{failed} required precache entries failed")]
    RequiredEntriesFailed {
        failed: usize,
        report: Box<InstallReport>,
    },
}

/// A manifest entry that could not be precached.
#[derive(Debug)]
pub struct ManifestFailure {
    pub url: Url,
    pub required: bool,
    pub error: WorkerError,
}

/// Outcome of populating the static partition.
#[derive(Debug)]
pub struct InstallReport {
    pub version: VersionTag,
    pub partition: PartitionId,
    pub stored: usize,
    pub failed: Vec<ManifestFailure>,
    /// Manifest values that were never attempted.
    pub rejected: Vec<String>,
}

impl InstallReport {
    pub fn required_failures(&self) -> usize {
        self.failed.iter().filter(|f| f.required).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.rejected.is_empty()
    }
}

/// Outcome of pruning stale partitions.
#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
    pub kept: Vec<PartitionId>,
    pub deleted: Vec<PartitionId>,
    pub failed: Vec<(PartitionId, CacheError)>,
    /// Client sessions taken over.
    pub claimed: usize,
}

/// Owns the partition layout across version upgrades.
pub struct CacheLifecycleManager {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    partitions: PartitionSet,
    clients: Arc<ClientRegistry>,
    origin: Url,
    policy: PrecachePolicy,
}

impl CacheLifecycleManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        partitions: PartitionSet,
        clients: Arc<ClientRegistry>,
        origin: Url,
        policy: PrecachePolicy,
    ) -> Self {
        Self {
            store,
            fetcher,
            partitions,
            clients,
            origin,
            policy,
        }
    }

    pub fn partitions(&self) -> &PartitionSet {
        &self.partitions
    }

    /// Populate the current static partition from the manifest.
    ///
    /// Entries are fetched concurrently and fail independently. Malformed
    /// entries are rejected before any network attempt.
    pub async fn on_install(&self, manifest: &AssetManifest) -> Result<InstallReport, InstallError> {
        let partition = self.partitions.get(PartitionRole::Static).clone();
        info!(partition = %partition, entries = manifest.len(), "Installing");

        self.store
            .open(&partition)
            .await
            .map_err(|source| InstallError::Open {
                partition: partition.to_string(),
                source,
            })?;

        let resolved = manifest.resolve(&self.origin);
        let results = join_all(
            resolved
                .entries
                .iter()
                .map(|entry| self.precache(&partition, entry)),
        )
        .await;

        let mut report = InstallReport {
            version: self.partitions.version().clone(),
            partition,
            stored: 0,
            failed: Vec::new(),
            rejected: resolved.rejected,
        };
        for (entry, result) in resolved.entries.into_iter().zip(results) {
            match result {
                Ok(()) => report.stored += 1,
                Err(error) => {
                    warn!(url = %entry.url, required = entry.required, error = %error, "Precache failed");
                    report.failed.push(ManifestFailure {
                        url: entry.url,
                        required: entry.required,
                        error,
                    });
                }
            }
        }

        let required_failed = report.required_failures();
        info!(
            stored = report.stored,
            failed = report.failed.len(),
            rejected = report.rejected.len(),
            "Install finished"
        );
        if self.policy == PrecachePolicy::Strict && required_failed > 0 {
            return Err(InstallError::RequiredEntriesFailed {
                failed: required_failed,
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    async fn precache(&self, partition: &PartitionId, entry: &ManifestEntry) -> Result<(), WorkerError> {
        let manifest_error = |reason: String| WorkerError::ManifestFetch {
            url: entry.url.to_string(),
            reason,
        };

        let mode = if entry.url.origin() == self.origin.origin() {
            RequestMode::SameOrigin
        } else {
            RequestMode::Cors
        };
        let request = Request::get(entry.url.clone()).mode(mode);

        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| manifest_error(e.to_string()))?;
        if !response.is_cacheable() {
            return Err(manifest_error(format!(
                "status {} ({:?} response)",
                response.status, response.response_type
            )));
        }
        let response = response
            .materialize()
            .await
            .map_err(|e| manifest_error(e.to_string()))?;

        let cached = CacheEntry::from_response(RequestKey::get(&entry.url), &response)?;
        self.store.put(partition, cached).await?;
        debug!(url = %entry.url, "Precached");
        Ok(())
    }

    /// Delete every partition outside the current keep set, then claim open
    /// clients. Never fails; problems are logged and reported.
    pub async fn on_activate(&self) -> ActivateReport {
        let mut report = ActivateReport::default();

        match self.store.partitions().await {
            Ok(existing) => {
                for partition in existing {
                    if self.partitions.contains(&partition) {
                        report.kept.push(partition);
                        continue;
                    }
                    match self.store.delete(&partition).await {
                        Ok(_) => {
                            info!(partition = %partition, "Deleted stale partition");
                            report.deleted.push(partition);
                        }
                        Err(e) => {
                            warn!(partition = %partition, error = %e, "Failed to delete partition");
                            report.failed.push((partition, e));
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not enumerate partitions"),
        }

        report.claimed = self.clients.claim(self.partitions.version()).await;
        report
    }
}
