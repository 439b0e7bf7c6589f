//! HTTP transport for the cache engine.
//!
//! ### Behaviour
//! - Any method; request headers and body forwarded as given
//! - Non-2xx statuses are returned as responses, never as errors
//! - Hard client timeout, independent of the per-group race timeout
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)

pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, header};

pub use url::{UrlError, cache_url, canonicalize};

use dyncache_core::dynamic::Fetch;
use dyncache_core::{AppConfig, Error, Method, Request, Response, ResponseKind};

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "dyncache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 30s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

impl FetchConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: 5 * 1024 * 1024,
            timeout: config.timeout(),
            max_redirects: 5,
        }
    }
}

/// reqwest-backed `Fetch`.
pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    fn too_large(&self, len: u64) -> Error {
        Error::Network(format!("{len} bytes exceeds {}", self.config.max_bytes))
    }
}

fn to_reqwest_method(method: &Method) -> Result<reqwest::Method, Error> {
    reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| Error::InvalidInput(format!("invalid HTTP method: {method}")))
}

fn collect_headers(headers: &header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, req: &Request) -> Result<Response, Error> {
        let start = Instant::now();

        let mut builder = self.http.request(to_reqwest_method(&req.method)?, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("network error: {e}")))?;

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(self.too_large(len));
        }

        let status = response.status();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response: {e}")))?;

        if body.len() > self.config.max_bytes {
            return Err(self.too_large(body.len() as u64));
        }

        tracing::debug!(
            method = %req.method,
            url = %req.url,
            status = status.as_u16(),
            bytes = body.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "fetched"
        );

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            kind: ResponseKind::Basic,
        })
    }
}
