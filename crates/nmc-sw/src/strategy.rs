//! Caching strategies.
//!
//! Every strategy resolves to a [`Response`]. Network failures become a
//! cached copy, a fallback document, an empty payload, or a network-error
//! response, depending on the strategy and request class.

use std::sync::Arc;
use std::time::Duration;

use nmc_common::{with_timeout, DynamicDataFallback, Strategy};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{MatchOptions, SharedCacheStorage};
use crate::error::FetchError;
use crate::generation::CacheGeneration;
use crate::net::Fetcher;
use crate::request::{CacheMode, Request, Response};
use crate::routing::RequestClass;

/// Result of running a strategy.
#[derive(Debug)]
pub struct StrategyOutcome {
    pub response: Response,
    /// Background cache refresh, if one was started.
    pub background: Option<JoinHandle<()>>,
}

impl StrategyOutcome {
    fn respond(response: Response) -> Self {
        Self {
            response,
            background: None,
        }
    }
}

/// Everything a strategy needs, cheap to clone into background tasks.
#[derive(Clone)]
pub struct StrategyContext {
    pub storage: SharedCacheStorage,
    pub fetcher: Arc<dyn Fetcher>,
    pub generation: CacheGeneration,
    pub offline_fallback: Url,
    pub document_ignore_search: bool,
    pub dynamic_data_fallback: DynamicDataFallback,
    pub fetch_timeout: Option<Duration>,
}

impl StrategyContext {
    /// Run `strategy` for a request of `class`.
    pub async fn run(
        &self,
        strategy: Strategy,
        class: RequestClass,
        request: Request,
    ) -> StrategyOutcome {
        match strategy {
            Strategy::NetworkFirst => StrategyOutcome::respond(self.network_first(class, &request).await),
            Strategy::CacheFirst => StrategyOutcome::respond(self.cache_first(class, &request).await),
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(class, request).await,
            Strategy::NetworkOnly => StrategyOutcome::respond(self.network_only(class, &request).await),
            Strategy::Passthrough => {
                // Interception never routes here; answer like the network would.
                StrategyOutcome::respond(self.fetch_or_error(&request).await)
            }
        }
    }

    /// Network, then cache, then the class fallback.
    pub async fn network_first(&self, class: RequestClass, request: &Request) -> Response {
        match self.fetch_fresh(request).await {
            Ok(fresh) => {
                self.store(class, &request.url, &fresh).await;
                fresh
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.lookup(class, &request.url).await {
                    Some(cached) => cached,
                    None => self.last_resort(class).await,
                }
            }
        }
    }

    /// Cache, then network (stored on success).
    pub async fn cache_first(&self, class: RequestClass, request: &Request) -> Response {
        if let Some(cached) = self.lookup(class, &request.url).await {
            return cached;
        }
        match self.fetch_fresh(request).await {
            Ok(fresh) => {
                self.store(class, &request.url, &fresh).await;
                fresh
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Cache miss and network failed");
                self.last_resort(class).await
            }
        }
    }

    /// Cached entry now, refreshed in the background for next time.
    pub async fn stale_while_revalidate(
        &self,
        class: RequestClass,
        request: Request,
    ) -> StrategyOutcome {
        let Some(cached) = self.lookup(class, &request.url).await else {
            return StrategyOutcome::respond(self.cache_first(class, &request).await);
        };

        let ctx = self.clone();
        let background = tokio::spawn(async move {
            match ctx.fetch_fresh(&request).await {
                Ok(fresh) => {
                    ctx.store(class, &request.url, &fresh).await;
                }
                Err(e) => debug!(url = %request.url, error = %e, "Background refresh failed"),
            }
        });

        StrategyOutcome {
            response: cached,
            background: Some(background),
        }
    }

    /// Network without runtime caching.
    ///
    /// Dynamic data falls back to the current generation's copy (marked as
    /// a fallback) when the policy allows it, then to the empty payload.
    pub async fn network_only(&self, class: RequestClass, request: &Request) -> Response {
        let request = request.clone().cache_mode(CacheMode::NoStore);
        match self.fetch_fresh(&request).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(url = %request.url, %class, error = %e, "Network-only fetch failed");
                if class == RequestClass::DynamicData
                    && self.dynamic_data_fallback == DynamicDataFallback::CachedThenEmpty
                {
                    if let Some(cached) = self.lookup(class, &request.url).await {
                        return cached.with_fallback_marker("cache");
                    }
                }
                self.last_resort(class).await
            }
        }
    }

    async fn fetch_or_error(&self, request: &Request) -> Response {
        self.fetch_fresh(request)
            .await
            .unwrap_or_else(|_| Response::network_error())
    }

    async fn fetch_fresh(&self, request: &Request) -> Result<Response, FetchError> {
        with_timeout(self.fetch_timeout, self.fetcher.fetch(request)).await?
    }

    fn ignore_search(&self, class: RequestClass) -> bool {
        match class {
            RequestClass::Navigation => self.document_ignore_search,
            RequestClass::DynamicData => true,
            _ => false,
        }
    }

    fn partition_for(&self, class: RequestClass, url: &Url) -> String {
        self.generation.partition(class.partition_kind(url))
    }

    /// Write a successful response into the current generation.
    async fn store(&self, class: RequestClass, url: &Url, response: &Response) -> bool {
        if !response.is_cacheable() {
            debug!(url = %url, status = response.status, "Not caching response");
            return false;
        }
        let partition = self.partition_for(class, url);
        let mut storage = self.storage.write().await;
        storage
            .open(&partition)
            .put(url, response, self.ignore_search(class))
    }

    /// Look a URL up in the current generation only.
    async fn lookup(&self, class: RequestClass, url: &Url) -> Option<Response> {
        let options = MatchOptions {
            ignore_search: self.ignore_search(class),
        };
        let storage = self.storage.read().await;
        storage
            .match_in(&self.generation.partitions(), url, options)
            .map(|entry| entry.to_response())
    }

    /// Final answer when network and cache both failed.
    async fn last_resort(&self, class: RequestClass) -> Response {
        match class {
            RequestClass::Navigation => {
                match self.lookup(class, &self.offline_fallback).await {
                    Some(document) => document.with_fallback_marker("offline"),
                    None => Response::offline_page(),
                }
            }
            RequestClass::DynamicData => Response::empty_json(),
            _ => Response::network_error(),
        }
    }
}
