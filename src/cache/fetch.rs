//! Request/response snapshots and the network seam
//!
//! The engine never talks to reqwest directly; it goes through [`Fetcher`] so
//! the host can hand it any transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::CacheError;

/// HTTP client timeout for intercepted fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How the request was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level document load
    Navigate,
    /// Script, style, image, XHR and everything else
    Subresource,
}

/// An intercepted outbound request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub mode: RequestMode,
}

impl Request {
    /// Subresource GET
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            mode: RequestMode::Subresource,
        }
    }

    /// Document navigation accepting HTML
    pub fn navigate(url: Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        Self {
            method: Method::GET,
            url,
            headers,
            mode: RequestMode::Navigate,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_accept(mut self, accept: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(accept) {
            self.headers.insert(ACCEPT, value);
        }
        self
    }

    pub fn accept(&self) -> Option<&str> {
        self.headers.get(ACCEPT).and_then(|v| v.to_str().ok())
    }

    /// Cache identity: method plus absolute URL without fragment
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }
}

/// Response tainting, mirroring what a browser exposes to script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseKind {
    /// Same-origin response
    Basic,
    /// Cross-origin response readable via CORS
    Cors,
    /// Cross-origin response with no readable content
    Opaque,
}

/// A response snapshot
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Final URL after redirects
    pub url: Url,
    pub kind: ResponseKind,
}

impl Response {
    pub fn new(url: Url, status: StatusCode, body: impl Into<Vec<u8>>, kind: ResponseKind) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            url,
            kind,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// Whether two URLs share scheme, host and port
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Network transport used by the engine
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError>;
}

/// Fetcher backed by reqwest
pub struct HttpFetcher {
    client: Client,
    /// Origin the engine serves; decides Basic vs Cors
    origin: Url,
}

impl HttpFetcher {
    pub fn new(origin: Url) -> Result<Self, CacheError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| CacheError::Network(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, origin })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| CacheError::Network(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let kind = if same_origin(&url, &self.origin) {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        };

        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::Network(e.to_string()))?;

        debug!(url = %url, status = status.as_u16(), size = body.len(), "Fetched from network");
        Ok(Response {
            status,
            headers,
            body: body.to_vec(),
            url,
            kind,
        })
    }
}
