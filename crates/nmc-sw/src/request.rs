//! Intercepted requests and the responses strategies resolve to.

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

/// Header marking a response the worker substituted for the network.
pub const FALLBACK_HEADER: &str = "x-nmc-fallback";

/// Request mode, as seen by the fetch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level or frame navigation.
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// What the request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR.
    #[default]
    Empty,
}

/// HTTP cache interaction requested for the network fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Bypass the HTTP cache and update it.
    Reload,
    /// Bypass the HTTP cache entirely.
    NoStore,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub destination: RequestDestination,
    pub cache: CacheMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
            destination: RequestDestination::default(),
            cache: CacheMode::default(),
        }
    }

    /// Create a top-level document navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: RequestDestination::Document,
            ..Self::get(url)
        }
    }

    /// Create a request with an arbitrary method.
    pub fn with_method(url: Url, method: Method) -> Self {
        Self {
            method,
            ..Self::get(url)
        }
    }

    pub fn destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    pub fn cache_mode(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Whether this is a document navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == RequestDestination::Document
    }
}

/// Response type, following the fetch standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    /// Cross-origin no-cors response; status and body are hidden.
    Opaque,
    /// Network error.
    Error,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    #[default]
    Network,
    Cache,
    /// Built by the worker (offline page, empty payload, network error).
    Synthesized,
}

/// Response returned to the page.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status code; 0 for network errors and opaque responses.
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    pub source: ResponseSource,
}

impl Response {
    /// Create a basic network response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            source: ResponseSource::Network,
        }
    }

    /// Create a network error response (`Response.error()`).
    pub fn network_error() -> Self {
        Self {
            status: 0,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            response_type: ResponseType::Error,
            source: ResponseSource::Synthesized,
        }
    }

    /// Last-resort page for navigations with neither network nor cache.
    pub fn offline_page() -> Self {
        let body = "<!doctype html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
                    <body><h1>Offline</h1><p>This page is not available offline yet. \
                    Reconnect and reload.</p></body></html>";
        Self {
            source: ResponseSource::Synthesized,
            ..Self::new(503, body)
        }
        .with_header(CONTENT_TYPE, "text/html; charset=utf-8")
        .with_header(CACHE_CONTROL, "no-store")
        .with_fallback_marker("offline")
    }

    /// Benign empty payload for dynamic data.
    pub fn empty_json() -> Self {
        Self {
            source: ResponseSource::Synthesized,
            ..Self::new(503, "{}")
        }
        .with_header(CONTENT_TYPE, "application/json")
        .with_header(CACHE_CONTROL, "no-store")
        .with_fallback_marker("empty")
    }

    pub fn with_header(mut self, name: HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    /// Mark the response as a worker substitution.
    pub fn with_fallback_marker(self, kind: &'static str) -> Self {
        self.with_header(HeaderName::from_static(FALLBACK_HEADER), kind)
    }

    /// Fallback marker, if any.
    pub fn fallback(&self) -> Option<&str> {
        self.headers
            .get(FALLBACK_HEADER)
            .and_then(|v| v.to_str().ok())
    }

    /// Check if response is success (2xx).
    pub fn ok(&self) -> bool {
        self.response_type != ResponseType::Error && (200..300).contains(&self.status)
    }

    /// Whether this response may be written to a cache partition.
    pub fn is_cacheable(&self) -> bool {
        self.ok()
            && self.response_type != ResponseType::Opaque
            && self.source != ResponseSource::Synthesized
    }

    pub fn is_network_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }
}

/// Cache key for a URL: fragment dropped, query optionally dropped.
pub fn cache_key(url: &Url, ignore_search: bool) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    if ignore_search {
        key.set_query(None);
    }
    key.into()
}
