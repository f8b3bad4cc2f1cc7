//! Cache API: named partitions of request → response entries.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::request::{cache_key, Response, ResponseSource, ResponseType};

/// Cache storage shared between the worker and every page of the origin.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key (request URL without fragment).
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response under a key.
    pub fn from_response(key: String, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: key,
            status: response.status,
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the response served from this entry.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Response {
            status: self.status,
            headers,
            body: Bytes::from(self.body.clone()),
            response_type: ResponseType::Basic,
            source: ResponseSource::Cache,
        }
    }
}

/// Options for `match`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Compare URLs without their query string.
    pub ignore_search: bool,
}

impl MatchOptions {
    pub fn ignoring_search() -> Self {
        Self {
            ignore_search: true,
        }
    }
}

/// A cache partition.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries by key.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request URL.
    pub fn match_url(&self, url: &Url, options: MatchOptions) -> Option<&CacheEntry> {
        let exact = cache_key(url, false);
        if let Some(entry) = self.entries.get(&exact) {
            return Some(entry);
        }
        if !options.ignore_search {
            return None;
        }

        let wanted = cache_key(url, true);
        self.entries.values().find(|entry| {
            Url::parse(&entry.url)
                .map(|stored| cache_key(&stored, true) == wanted)
                .unwrap_or(false)
        })
    }

    /// Store a response under a request URL.
    ///
    /// Unsuccessful, opaque, and synthesized responses are refused; returns
    /// whether the entry was written.
    pub fn put(&mut self, url: &Url, response: &Response, ignore_search: bool) -> bool {
        if !response.is_cacheable() {
            return false;
        }
        let key = cache_key(url, ignore_search);
        let entry = CacheEntry::from_response(key.clone(), response);
        self.entries.insert(key, entry);
        true
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(&cache_key(url, false)).is_some()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache storage (`caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage wrapped for sharing.
    pub fn shared() -> SharedCacheStorage {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Match across the named caches, in order.
    pub fn match_in<S: AsRef<str>>(
        &self,
        names: &[S],
        url: &Url,
        options: MatchOptions,
    ) -> Option<&CacheEntry> {
        names
            .iter()
            .filter_map(|name| self.caches.get(name.as_ref()))
            .find_map(|cache| cache.match_url(url, options))
    }

    /// Delete every cache; returns the deleted names.
    pub fn clear(&mut self) -> Vec<String> {
        let names = self.keys();
        self.caches.clear();
        names
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
