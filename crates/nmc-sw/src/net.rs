//! Network access for strategies.

use std::time::Duration;

use async_trait::async_trait;
use http::header::{CACHE_CONTROL, PRAGMA};
use http::HeaderValue;
use reqwest::Client;
use tracing::{debug, trace};

use crate::error::FetchError;
use crate::request::{CacheMode, Request, Response, ResponseSource, ResponseType};

/// Something that can perform a network fetch.
///
/// A non-2xx status is a successful fetch; only transport failures are
/// errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// HTTP fetcher configuration.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Transport timeout; strategies may impose a shorter one.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("nmc-offline/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// `reqwest`-backed fetcher.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::network(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        debug!(url = %request.url, method = %request.method, cache = ?request.cache, "Fetching");

        let mut headers = request.headers.clone();
        match request.cache {
            CacheMode::Default => {}
            CacheMode::Reload => {
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            }
            CacheMode::NoStore => {
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
                headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            }
        }

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| FetchError::network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        trace!(url = %request.url, status, body_len = body.len(), "Response received");

        Ok(Response {
            status,
            headers,
            body,
            response_type: ResponseType::Basic,
            source: ResponseSource::Network,
        })
    }
}
