//! # NMC Service Worker
//!
//! Offline cache lifecycle manager for the NMC dose reference site.
//!
//! ## Features
//!
//! - **Generations**: versioned cache partitions, stale ones swept on activate
//! - **Precache**: best-effort install of the core asset manifest
//! - **Routing**: declarative class → strategy table
//! - **Strategies**: network-first, cache-first, stale-while-revalidate,
//!   network-only with explicit fallbacks
//! - **Clients API**: claiming open pages on activate
//!
//! ## Architecture
//!
//! ```text
//! CacheLifecycleManager
//!     ├── RouteTable (Request → RequestClass → Strategy)
//!     ├── StrategyContext
//!     │       ├── Fetcher (network)
//!     │       └── CacheStorage (shared with pages)
//!     │               └── Cache "<namespace>-<version>[-pages|-static]"
//!     └── Clients (claimed on activate)
//! ```

pub mod cache;
pub mod clients;
pub mod error;
pub mod generation;
pub mod net;
pub mod request;
pub mod routing;
pub mod strategy;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, MatchOptions, SharedCacheStorage};
pub use clients::{Client, ClientType, Clients, SharedClients};
pub use error::{FetchError, Result, ServiceWorkerError};
pub use generation::{CacheGeneration, PartitionKind};
pub use net::{Fetcher, HttpFetcher, HttpFetcherConfig};
pub use request::{
    CacheMode, Request, RequestDestination, RequestMode, Response, ResponseSource, ResponseType,
    FALLBACK_HEADER,
};
pub use routing::{RequestClass, RouteTable};
pub use strategy::{StrategyContext, StrategyOutcome};
pub use worker::{
    ActivateReport, CacheLifecycleManager, FetchDisposition, InstallReport, LifecycleEvent,
    MessageReply, PassthroughReason, SkippedAsset, WorkerId, WorkerMessage, WorkerState,
};
