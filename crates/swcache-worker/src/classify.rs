//! Request classification.
//!
//! Classification is an ordered rule table: the first rule whose condition
//! holds assigns the [`RouteCategory`]. It reads only the request and the
//! table, so it can be tested apart from strategy execution.

use http::Method;
use serde::{Deserialize, Serialize};
use swcache_net::pattern::any_match;
use swcache_net::{Destination, Request, UrlPattern};
use tracing::{debug, trace};
use url::{Origin, Url};

use crate::config::WorkerConfig;
use crate::WorkerError;

/// Route category of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteCategory {
    /// Navigations and HTML pages.
    Document,
    /// Scripts, styles, images, fonts.
    StaticAsset,
    /// Remote data endpoints.
    ApiCall,
    /// Third-party requests; never intercepted.
    CrossOrigin,
    Other,
}

/// Condition of a routing rule.
#[derive(Debug, Clone)]
pub enum RouteCondition {
    /// Non-GET methods and non-http(s) schemes.
    Uncacheable,
    /// Origin differs from the application's own. Declared API hosts are
    /// not foreign.
    ForeignOrigin,
    /// Any of the URL patterns matches.
    AnyUrl(Vec<UrlPattern>),
    /// Destination is one of the listed ones.
    Destination(Vec<Destination>),
    /// Destination is listed, or any URL pattern matches.
    DestinationOrUrl(Vec<Destination>, Vec<UrlPattern>),
    Always,
}

/// One row of the routing table.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub condition: RouteCondition,
    pub category: RouteCategory,
}

impl RouteRule {
    pub fn new(condition: RouteCondition, category: RouteCategory) -> Self {
        Self {
            condition,
            category,
        }
    }
}

/// Maps requests to route categories.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    origin: Origin,
    api_hosts: Vec<UrlPattern>,
    rules: Vec<RouteRule>,
}

impl RequestClassifier {
    /// Build a classifier with an explicit table.
    pub fn new(app_url: &Url, api_hosts: Vec<UrlPattern>, rules: Vec<RouteRule>) -> Self {
        Self {
            origin: app_url.origin(),
            api_hosts,
            rules,
        }
    }

    /// The standard table for a configured application.
    pub fn from_config(config: &WorkerConfig) -> Self {
        let api_hosts: Vec<UrlPattern> = config
            .api_hosts
            .iter()
            .map(|h| UrlPattern::host_suffix(h))
            .collect();
        let api_urls: Vec<UrlPattern> = api_hosts
            .iter()
            .cloned()
            .chain(config.api_path_prefixes.iter().map(|p| UrlPattern::path_prefix(p)))
            .collect();

        let rules = vec![
            RouteRule::new(RouteCondition::Uncacheable, RouteCategory::Other),
            RouteRule::new(RouteCondition::ForeignOrigin, RouteCategory::CrossOrigin),
            RouteRule::new(RouteCondition::AnyUrl(api_urls), RouteCategory::ApiCall),
            RouteRule::new(
                RouteCondition::DestinationOrUrl(
                    vec![Destination::Document],
                    config.document_patterns.clone(),
                ),
                RouteCategory::Document,
            ),
            RouteRule::new(
                RouteCondition::Destination(vec![
                    Destination::Style,
                    Destination::Script,
                    Destination::Image,
                    Destination::Font,
                ]),
                RouteCategory::StaticAsset,
            ),
            RouteRule::new(RouteCondition::Always, RouteCategory::Other),
        ];

        Self::new(&config.origin, api_hosts, rules)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Whether the engine may handle the request at all: GET over http(s).
    pub fn is_interceptable(request: &Request) -> bool {
        request.method == Method::GET && matches!(request.url.scheme(), "http" | "https")
    }

    /// Classify a request. Never fails: an unclassifiable request is `Other`.
    pub fn classify(&self, request: &Request) -> RouteCategory {
        match self.try_classify(request) {
            Ok(category) => category,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Defaulting to Other");
                RouteCategory::Other
            }
        }
    }

    /// Classify a request, reporting requests no rule covers.
    pub fn try_classify(&self, request: &Request) -> Result<RouteCategory, WorkerError> {
        let rule = self
            .rules
            .iter()
            .find(|rule| self.holds(&rule.condition, request))
            .ok_or_else(|| {
                WorkerError::Classification(format!("{} {}", request.method, request.url))
            })?;
        trace!(url = %request.url, category = ?rule.category, "Classified request");
        Ok(rule.category)
    }

    fn holds(&self, condition: &RouteCondition, request: &Request) -> bool {
        let url = &request.url;
        match condition {
            RouteCondition::Uncacheable => !Self::is_interceptable(request),
            RouteCondition::ForeignOrigin => {
                url.origin() != self.origin && !any_match(&self.api_hosts, url)
            }
            RouteCondition::AnyUrl(patterns) => any_match(patterns, url),
            RouteCondition::Destination(destinations) => {
                destinations.contains(&request.destination)
            }
            RouteCondition::DestinationOrUrl(destinations, patterns) => {
                destinations.contains(&request.destination) || any_match(patterns, url)
            }
            RouteCondition::Always => true,
        }
    }
}
