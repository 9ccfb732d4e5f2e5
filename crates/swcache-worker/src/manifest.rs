//! Precache asset manifest.

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::config::resolve_against;

/// Assets to populate the static partition with at install.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetManifest {
    /// Entries the application cannot start offline without.
    pub required: Vec<String>,
    /// Nice-to-have entries (third-party styles, fonts).
    pub optional: Vec<String>,
}

/// A manifest entry resolved to an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub url: Url,
    pub required: bool,
}

/// Result of resolving a manifest against the application origin.
#[derive(Debug, Clone, Default)]
pub struct ResolvedManifest {
    pub entries: Vec<ManifestEntry>,
    /// Raw values that are not fetchable URLs.
    pub rejected: Vec<String>,
}

impl AssetManifest {
    pub fn new(required: &[&str], optional: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.required.len() + self.optional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve every entry against `base`.
    ///
    /// Duplicates collapse into one entry, required if any occurrence was.
    pub fn resolve(&self, base: &Url) -> ResolvedManifest {
        let mut resolved = ResolvedManifest::default();
        let all = self
            .required
            .iter()
            .map(|raw| (raw, true))
            .chain(self.optional.iter().map(|raw| (raw, false)));

        for (raw, required) in all {
            let Some(url) = resolve_against(base, raw) else {
                warn!(entry = %raw, "Skipping malformed manifest entry");
                resolved.rejected.push(raw.clone());
                continue;
            };
            match resolved.entries.iter_mut().find(|e| e.url == url) {
                Some(existing) => existing.required |= required,
                None => resolved.entries.push(ManifestEntry { url, required }),
            }
        }
        resolved
    }
}
