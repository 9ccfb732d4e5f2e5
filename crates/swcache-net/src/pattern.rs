//! URL patterns used by routing and strategy tables.

use serde::{Deserialize, Serialize};
use url::Url;

/// Which part of a URL a pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Exact URL match.
    Exact,
    /// Prefix of the full URL.
    Prefix,
    /// Substring anywhere in the full URL.
    Contains,
    /// Exact host match.
    Host,
    /// Host suffix (e.g. a domain and its subdomains).
    HostSuffix,
    /// Prefix of the URL path.
    PathPrefix,
    /// Suffix of the URL path (e.g. an extension).
    PathSuffix,
}

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    /// Pattern type.
    pub kind: PatternKind,
    /// Pattern string.
    pub pattern: String,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self::new(PatternKind::Exact, url)
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self::new(PatternKind::Prefix, prefix)
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::new(PatternKind::Contains, substring)
    }

    /// Match a host exactly.
    pub fn host(host: &str) -> Self {
        Self::new(PatternKind::Host, host)
    }

    /// Match a domain and everything below it.
    pub fn host_suffix(suffix: &str) -> Self {
        Self::new(PatternKind::HostSuffix, suffix)
    }

    /// Match a path prefix (e.g. `/rest/v1/`).
    pub fn path_prefix(prefix: &str) -> Self {
        Self::new(PatternKind::PathPrefix, prefix)
    }

    /// Match a path suffix (e.g. `.html`).
    pub fn path_suffix(suffix: &str) -> Self {
        Self::new(PatternKind::PathSuffix, suffix)
    }

    fn new(kind: PatternKind, pattern: &str) -> Self {
        Self {
            kind,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.kind {
            PatternKind::Exact => url_str == self.pattern,
            PatternKind::Prefix => url_str.starts_with(&self.pattern),
            PatternKind::Contains => url_str.contains(&self.pattern),
            PatternKind::Host => url
                .host_str()
                .is_some_and(|h| h.eq_ignore_ascii_case(&self.pattern)),
            PatternKind::HostSuffix => url.host_str().is_some_and(|h| {
                let h = h.to_ascii_lowercase();
                let suffix = self.pattern.trim_start_matches('.').to_ascii_lowercase();
                h == suffix || h.ends_with(&format!(".{suffix}"))
            }),
            PatternKind::PathPrefix => url.path().starts_with(&self.pattern),
            PatternKind::PathSuffix => url.path().ends_with(&self.pattern),
        }
    }
}

/// True if any pattern in the list matches.
pub fn any_match(patterns: &[UrlPattern], url: &Url) -> bool {
    patterns.iter().any(|p| p.matches(url))
}
