//! reqwest-backed [`Fetcher`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::{Origin, Url};

use crate::{Fetcher, NetError, Request, RequestMode, Response, ResponseType};

/// Number of body chunks buffered between the socket and the reader.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Per-request timeout. The engine itself never times out a fetch.
    pub default_timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Enable cookies.
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("swcache/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Some(Duration::from_secs(30)),
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// Performs requests over HTTP(S) on behalf of an application origin.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
    origin: Origin,
}

impl HttpFetcher {
    /// Create a fetcher for the application served from `app_url`.
    pub fn new(config: LoaderConfig, app_url: &Url) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled);
        if let Some(timeout) = config.default_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %app_url.origin().ascii_serialization(), "HttpFetcher initialized");

        Ok(Self {
            client,
            config,
            origin: app_url.origin(),
        })
    }

    fn response_type(&self, request: &Request, final_url: &Url) -> ResponseType {
        if final_url.origin() == self.origin {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }
        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(body) = &request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.default_timeout.unwrap_or_default())
            } else if e.is_connect() {
                NetError::Unreachable(e.to_string())
            } else {
                NetError::HttpError(e)
            }
        })?;

        let url = response.url().clone();
        let response_type = self.response_type(request, &url);
        if response_type == ResponseType::Opaque {
            trace!(url = %url, "Opaque cross-origin response");
            return Ok(Response::opaque(url));
        }

        let status = response.status();
        let headers = response.headers().clone();

        let (tx, rx) = mpsc::channel::<Result<Bytes, NetError>>(BODY_CHANNEL_CAPACITY);
        let mut stream = Box::pin(response.bytes_stream());
        let body_url = url.clone();
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(NetError::from);
                let failed = chunk.is_err();
                if tx.send(chunk).await.is_err() {
                    trace!(url = %body_url, "Body reader dropped");
                    break;
                }
                if failed {
                    warn!(url = %body_url, "Body stream failed");
                    break;
                }
            }
        });

        trace!(
            url = %url,
            status = %status,
            response_type = ?response_type,
            "Response received"
        );

        let mut out = Response::streaming(status.as_u16(), rx)
            .with_type(response_type)
            .with_url(url);
        out.headers = headers;
        if let Some(reason) = status.canonical_reason() {
            out.status_text = reason.to_string();
        }
        Ok(out)
    }
}
