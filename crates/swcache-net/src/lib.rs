//! # swcache net
//!
//! Request/response model and the network fetch capability consumed by the
//! swcache engine.
//!
//! ## Design Goals
//!
//! 1. **Opaque transport**: the engine only sees the [`Fetcher`] trait
//! 2. **Read-once bodies**: streamed bodies can be consumed exactly once, so
//!    any response that is both returned and stored goes through
//!    [`Response::duplicate`]
//! 3. **Fetch semantics**: response types (`basic`, `cors`, `opaque`, `error`)
//!    follow the browser fetch model closely enough for cacheability checks

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use mime::Mime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub mod loader;
pub mod pattern;

pub use loader::{HttpFetcher, LoaderConfig};
pub use pattern::{PatternKind, UrlPattern};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("Body error: {0}")]
    Body(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// The capability to perform a request over the network.
///
/// Implementations own transport, TLS and any timeout policy.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Style,
    Script,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR style requests.
    #[default]
    Empty,
}

impl Destination {
    /// Subresources that make up the application shell.
    pub fn is_static_asset(&self) -> bool {
        matches!(
            self,
            Destination::Style | Destination::Script | Destination::Image | Destination::Font
        )
    }
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    #[default]
    NoCors,
    Cors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub destination: Destination,
    pub mode: RequestMode,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            destination: Destination::Empty,
            mode: RequestMode::default(),
            body: None,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .destination(Destination::Document)
            .mode(RequestMode::Navigate)
            .header(
                header::ACCEPT,
                HeaderValue::from_static("text/html,application/xhtml+xml"),
            )
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            mode: RequestMode::Cors,
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether the `Accept` header asks for HTML.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains(mime::TEXT_HTML.essence_str()))
    }
}

/// Response type, as exposed by the fetch model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response the client is allowed to read.
    Cors,
    /// Cross-origin response whose content cannot be inspected.
    Opaque,
    /// Network error.
    Error,
}

/// HTTP response.
#[derive(Debug)]
pub struct Response {
    pub url: Option<Url>,
    /// Status code; 0 for network errors and opaque responses.
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    body: ResponseBody,
}

/// Response body variants.
#[derive(Debug)]
enum ResponseBody {
    /// Full body already loaded.
    Full(Bytes),
    /// Streaming body, readable once.
    Stream(mpsc::Receiver<Result<Bytes, NetError>>),
    /// Empty.
    Empty,
}

static EMPTY_BODY: Bytes = Bytes::from_static(b"");

impl Response {
    /// Create a basic response with a loaded body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            status_text: canonical_reason(status),
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            body: ResponseBody::Full(body.into()),
        }
    }

    /// Create a `text/plain` response.
    pub fn plain_text(status: u16, body: &str) -> Self {
        Self::new(status, Bytes::copy_from_slice(body.as_bytes())).with_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        )
    }

    /// Create a response whose body arrives on a channel.
    pub fn streaming(status: u16, chunks: mpsc::Receiver<Result<Bytes, NetError>>) -> Self {
        Self {
            body: ResponseBody::Stream(chunks),
            ..Self::new(status, Bytes::new())
        }
    }

    /// Create a network error response.
    pub fn network_error() -> Self {
        Self {
            url: None,
            status: 0,
            status_text: String::new(),
            headers: HeaderMap::new(),
            response_type: ResponseType::Error,
            body: ResponseBody::Empty,
        }
    }

    /// Create an opaque response: no status, headers or body are visible.
    pub fn opaque(url: Url) -> Self {
        Self {
            url: Some(url),
            response_type: ResponseType::Opaque,
            ..Self::network_error()
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Override the status text.
    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether this is a network error.
    pub fn is_network_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Whether the response may be written back to a cache: status exactly
    /// 200 and a type whose content can be validated.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
            && matches!(self.response_type, ResponseType::Basic | ResponseType::Cors)
    }

    /// Parsed `Content-Type`.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Whether the body is still an unread stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Borrow a loaded body. `None` while the body is still streaming.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Full(b) => Some(b),
            ResponseBody::Empty => Some(&EMPTY_BODY),
            ResponseBody::Stream(_) => None,
        }
    }

    /// Get the body as bytes.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        match self.body {
            ResponseBody::Full(b) => Ok(b),
            ResponseBody::Stream(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
            ResponseBody::Empty => Ok(Bytes::new()),
        }
    }

    /// Get the body as text.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| NetError::Body(e.to_string()))
    }

    /// Drain a streaming body into memory. Loaded bodies are returned as is.
    pub async fn materialize(self) -> Result<Self, NetError> {
        if !self.is_streaming() {
            return Ok(self);
        }
        let Response {
            url,
            status,
            status_text,
            headers,
            response_type,
            body,
        } = self;
        let body = Response {
            body,
            ..Response::new(status, Bytes::new())
        }
        .bytes()
        .await?;
        Ok(Self {
            url,
            status,
            status_text,
            headers,
            response_type,
            body: ResponseBody::Full(body),
        })
    }

    /// Copy a response whose body is already loaded. Streaming bodies cannot
    /// be copied without consuming them; use [`Response::duplicate`].
    pub fn try_clone(&self) -> Option<Self> {
        let body = match &self.body {
            ResponseBody::Full(b) => ResponseBody::Full(b.clone()),
            ResponseBody::Empty => ResponseBody::Empty,
            ResponseBody::Stream(_) => return None,
        };
        Some(Self {
            url: self.url.clone(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            response_type: self.response_type,
            body,
        })
    }

    /// Split a response into two independent consumers.
    ///
    /// The body is materialized first, so both halves can be read.
    pub async fn duplicate(self) -> Result<(Self, Self), NetError> {
        let original = self.materialize().await?;
        let copy = original
            .try_clone()
            .ok_or_else(|| NetError::Body("body still streaming after materialize".into()))?;
        Ok((original, copy))
    }
}

fn canonical_reason(status: u16) -> String {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string()
}
