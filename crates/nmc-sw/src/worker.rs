//! The cache lifecycle manager: install, activate, fetch, message.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use nmc_common::{ActivationPolicy, OfflineConfig, Strategy, VersionToken};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::SharedCacheStorage;
use crate::clients::SharedClients;
use crate::error::{Result, ServiceWorkerError};
use crate::generation::{CacheGeneration, PartitionKind};
use crate::net::Fetcher;
use crate::request::{CacheMode, Request, Response};
use crate::routing::{RequestClass, RouteTable};
use crate::strategy::StrategyContext;

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Script evaluated, install not yet run.
    #[default]
    Parsed,
    Installing,
    /// Installed and waiting to activate.
    Installed,
    Activating,
    /// Active and intercepting fetches.
    Activated,
    /// Replaced or unregistered.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Lifecycle events emitted by the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    StateChange {
        worker_id: WorkerId,
        state: WorkerState,
    },
    /// Stale partitions deleted during activate.
    GenerationSwept { deleted: Vec<String> },
    /// A page is now controlled by this worker.
    ControllerChange {
        worker_id: WorkerId,
        client_id: String,
    },
}

/// Messages a page may post to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Activate without waiting for old tabs to close.
    SkipWaiting,
    /// Report the running generation.
    GetVersion,
}

/// Reply to a [`WorkerMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageReply {
    /// Whether the request was accepted in the current state.
    SkipWaiting { accepted: bool },
    Version(VersionToken),
}

/// A manifest entry that could not be precached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedAsset {
    pub url: String,
    pub reason: String,
}

/// Outcome of the install step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallReport {
    pub version: String,
    pub cached: Vec<String>,
    pub skipped: Vec<SkippedAsset>,
    /// Whether the worker asks to activate right away.
    pub skip_waiting: bool,
}

/// Outcome of the activate step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub claimed: usize,
}

/// Why a request was left to the network untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// The worker is not active yet (or anymore).
    NotActivated,
    CrossOrigin,
    NonGet,
    /// Routed to `Strategy::Passthrough` by configuration.
    Unrouted,
}

/// What the fetch handler did with a request.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Not intercepted; the browser performs the request itself.
    Passthrough(PassthroughReason),
    /// Intercepted and answered.
    Respond {
        class: RequestClass,
        strategy: Strategy,
        response: Response,
    },
}

impl FetchDisposition {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchDisposition::Respond { response, .. } => Some(response),
            FetchDisposition::Passthrough(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchDisposition::Respond { response, .. } => Some(response),
            FetchDisposition::Passthrough(_) => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchDisposition::Passthrough(_))
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
    skip_waiting_requested: bool,
}

/// Offline worker for one origin/scope.
pub struct CacheLifecycleManager {
    id: WorkerId,
    script_url: Url,
    scope: Url,
    config: OfflineConfig,
    generation: CacheGeneration,
    manifest: Vec<Url>,
    routes: RouteTable,
    strategies: StrategyContext,
    clients: SharedClients,
    lifecycle: RwLock<Lifecycle>,
    background: Mutex<Vec<JoinHandle<()>>>,
    event_tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl CacheLifecycleManager {
    /// Start a worker from `script_url`.
    ///
    /// A `v=<token>` on the script URL overrides the configured version.
    pub fn new(
        config: OfflineConfig,
        script_url: Url,
        storage: SharedCacheStorage,
        clients: SharedClients,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LifecycleEvent>)> {
        let config = config.with_script_version(&script_url);
        config.validate()?;

        let scope = config.scope_url(&script_url)?;
        let generation = CacheGeneration::from_config(&config);
        let manifest = config.manifest.resolve(&scope);
        let routes = RouteTable::from_config(&config, &scope);
        let strategies = StrategyContext {
            storage,
            fetcher,
            generation: generation.clone(),
            offline_fallback: config.offline_fallback_url(&scope)?,
            document_ignore_search: config.document_ignore_search,
            dynamic_data_fallback: config.dynamic_data_fallback,
            fetch_timeout: config.fetch_timeout(),
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let id = WorkerId::next();
        debug!(worker = id.raw(), script = %script_url, generation = %generation.base_name(), "Worker parsed");

        Ok((
            Self {
                id,
                script_url,
                scope,
                config,
                generation,
                manifest,
                routes,
                strategies,
                clients,
                lifecycle: RwLock::new(Lifecycle {
                    state: WorkerState::Parsed,
                    skip_waiting_requested: false,
                }),
                background: Mutex::new(Vec::new()),
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn script_url(&self) -> &Url {
        &self.script_url
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn version(&self) -> &VersionToken {
        self.generation.version()
    }

    pub fn generation(&self) -> &CacheGeneration {
        &self.generation
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.read().await.state
    }

    async fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<()> {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state != expected {
            return Err(ServiceWorkerError::invalid_state(expected, lifecycle.state));
        }
        lifecycle.state = next;
        drop(lifecycle);

        info!(worker = self.id.raw(), from = %expected, to = %next, "Worker state change");
        let _ = self.event_tx.send(LifecycleEvent::StateChange {
            worker_id: self.id,
            state: next,
        });
        Ok(())
    }

    /// Install: precache the core manifest, best-effort.
    pub async fn install(&self) -> Result<InstallReport> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)
            .await?;

        {
            let mut storage = self.strategies.storage.write().await;
            for partition in self.generation.partitions() {
                storage.open(&partition);
            }
        }

        let fetches = self.manifest.iter().map(|url| {
            let request = Request::get(url.clone()).cache_mode(CacheMode::Reload);
            async move {
                let result = self.strategies.fetcher.fetch(&request).await;
                (request.url, result)
            }
        });
        let results = join_all(fetches).await;

        let mut cached = Vec::new();
        let mut skipped = Vec::new();
        {
            let mut storage = self.strategies.storage.write().await;
            for (url, result) in results {
                let reason = match result {
                    Ok(response) if response.is_cacheable() => {
                        let partition = self.generation.partition(PartitionKind::for_url(&url));
                        storage.open(&partition).put(&url, &response, false);
                        cached.push(url.to_string());
                        continue;
                    }
                    Ok(response) => format!("HTTP {}", response.status),
                    Err(e) => e.to_string(),
                };
                warn!(url = %url, reason = %reason, "Skipping precache entry");
                skipped.push(SkippedAsset {
                    url: url.to_string(),
                    reason,
                });
            }
        }

        self.transition(WorkerState::Installing, WorkerState::Installed)
            .await?;

        let skip_waiting = self.should_activate_now().await;
        info!(
            version = %self.version(),
            cached = cached.len(),
            skipped = skipped.len(),
            skip_waiting,
            "Install complete"
        );

        Ok(InstallReport {
            version: self.version().to_string(),
            cached,
            skipped,
            skip_waiting,
        })
    }

    /// Whether a waiting worker should activate without waiting for old
    /// tabs: configured policy or an explicit `SkipWaiting` message.
    pub async fn should_activate_now(&self) -> bool {
        let lifecycle = self.lifecycle.read().await;
        matches!(lifecycle.state, WorkerState::Installing | WorkerState::Installed)
            && (self.config.activation == ActivationPolicy::SkipWaiting
                || lifecycle.skip_waiting_requested)
    }

    /// Activate: sweep stale generations, then claim open pages.
    pub async fn activate(&self) -> Result<ActivateReport> {
        self.transition(WorkerState::Installed, WorkerState::Activating)
            .await?;

        let deleted = {
            let mut storage = self.strategies.storage.write().await;
            let stale: Vec<String> = storage
                .keys()
                .into_iter()
                .filter(|name| self.generation.is_stale(name))
                .collect();
            for name in &stale {
                storage.delete(name);
            }
            stale
        };
        if !deleted.is_empty() {
            info!(deleted = ?deleted, "Deleted stale cache partitions");
            let _ = self.event_tx.send(LifecycleEvent::GenerationSwept {
                deleted: deleted.clone(),
            });
        }

        let changes = self.clients.write().await.claim(self.id, &self.scope);
        for change in &changes {
            let _ = self.event_tx.send(LifecycleEvent::ControllerChange {
                worker_id: self.id,
                client_id: change.client_id.clone(),
            });
        }

        self.transition(WorkerState::Activating, WorkerState::Activated)
            .await?;

        Ok(ActivateReport {
            deleted,
            claimed: changes.len(),
        })
    }

    /// Mark the worker as replaced or unregistered.
    pub async fn make_redundant(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state == WorkerState::Redundant {
            return;
        }
        let from = lifecycle.state;
        lifecycle.state = WorkerState::Redundant;
        drop(lifecycle);

        info!(worker = self.id.raw(), %from, "Worker redundant");
        let _ = self.event_tx.send(LifecycleEvent::StateChange {
            worker_id: self.id,
            state: WorkerState::Redundant,
        });
    }

    /// Handle a page message.
    pub async fn handle_message(&self, message: WorkerMessage) -> MessageReply {
        match message {
            WorkerMessage::SkipWaiting => {
                let mut lifecycle = self.lifecycle.write().await;
                let accepted = matches!(
                    lifecycle.state,
                    WorkerState::Installing | WorkerState::Installed
                );
                if accepted {
                    lifecycle.skip_waiting_requested = true;
                    info!(worker = self.id.raw(), "Skip waiting requested");
                } else {
                    debug!(worker = self.id.raw(), state = %lifecycle.state, "Ignoring skip waiting");
                }
                MessageReply::SkipWaiting { accepted }
            }
            WorkerMessage::GetVersion => MessageReply::Version(self.version().clone()),
        }
    }

    /// Handle a fetch event.
    pub async fn handle_fetch(&self, request: Request) -> FetchDisposition {
        if self.state().await != WorkerState::Activated {
            return FetchDisposition::Passthrough(PassthroughReason::NotActivated);
        }

        let (class, strategy) = self.routes.route(&request);
        match class {
            RequestClass::CrossOrigin => {
                return FetchDisposition::Passthrough(PassthroughReason::CrossOrigin)
            }
            RequestClass::NonGet => return FetchDisposition::Passthrough(PassthroughReason::NonGet),
            _ if strategy == Strategy::Passthrough => {
                return FetchDisposition::Passthrough(PassthroughReason::Unrouted)
            }
            _ => {}
        }

        debug!(url = %request.url, %class, %strategy, "Intercepting request");
        let outcome = self.strategies.run(strategy, class, request).await;
        if let Some(handle) = outcome.background {
            let mut background = self.background.lock().await;
            background.retain(|h| !h.is_finished());
            background.push(handle);
        }

        FetchDisposition::Respond {
            class,
            strategy,
            response: outcome.response,
        }
    }

    /// Wait for outstanding background refreshes.
    pub async fn settle(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background.lock().await);
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Background refresh task failed");
            }
        }
    }
}
