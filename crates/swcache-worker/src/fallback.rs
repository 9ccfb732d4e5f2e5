//! Substitute responses for requests that neither cache nor network can serve.

use std::sync::Arc;

use swcache_net::{Destination, Request, Response};
use tracing::{debug, warn};

use crate::store::{CacheStore, PartitionId, RequestKey};
use crate::WorkerError;

/// Body of the synthesized offline response.
pub const OFFLINE_BODY: &str = "Offline";

/// Resolves total failures into deterministic responses. Reads precached
/// entries only; never touches the network.
pub struct FallbackResolver {
    store: Arc<dyn CacheStore>,
    partition: PartitionId,
    offline_document: Option<RequestKey>,
    fallback_image: Option<RequestKey>,
}

impl FallbackResolver {
    /// `partition` is the precache partition holding the fallbacks.
    pub fn new(
        store: Arc<dyn CacheStore>,
        partition: PartitionId,
        offline_document: Option<RequestKey>,
        fallback_image: Option<RequestKey>,
    ) -> Self {
        Self {
            store,
            partition,
            offline_document,
            fallback_image,
        }
    }

    /// The response of last resort: 503, `text/plain`, body `Offline`.
    pub fn service_unavailable() -> Response {
        Response::plain_text(503, OFFLINE_BODY).with_status_text("Service Unavailable")
    }

    pub async fn resolve(&self, request: &Request) -> Response {
        let substitute = if expects_html(request) {
            self.offline_document.as_ref()
        } else if request.destination == Destination::Image {
            self.fallback_image.as_ref()
        } else {
            None
        };

        if let Some(key) = substitute {
            match self.store.lookup(&self.partition, key).await {
                Ok(Some(entry)) => {
                    debug!(url = %request.url, fallback = %key, "Serving precached fallback");
                    return entry.to_response();
                }
                Ok(None) => debug!(fallback = %key, "Fallback not precached"),
                Err(e) => warn!(fallback = %key, error = %e, "Fallback lookup failed"),
            }
        }

        let exhausted = WorkerError::FallbackExhausted(request.url.to_string());
        debug!(error = %exhausted, "Synthesizing offline response");
        Self::service_unavailable()
    }
}

fn expects_html(request: &Request) -> bool {
    request.destination == Destination::Document || request.accepts_html()
}
