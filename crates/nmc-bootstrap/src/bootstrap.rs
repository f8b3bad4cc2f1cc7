//! Registration bootstrapper and escape hatch.
//!
//! Runs once per page load. It pins the page to the canonical worker script,
//! removes registrations left over from older script locations, and offers a
//! way back to plain network behavior.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nmc_common::{OfflineConfig, DEFAULT_VERSION, VERSION_PARAM};
use nmc_sw::SharedCacheStorage;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::container::{ContainerEvent, RegistrationContainer};
use crate::error::{BootstrapError, Result};
use crate::page::PageHost;
use crate::registration::Registration;

/// Session-storage key set once the escape hatch has reloaded the page.
pub const RESET_MARKER: &str = "nmc-sw-reset-done";

/// Whether offline support is turned on for this build or deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMode {
    Enabled,
    /// Unregister everything, clear caches, never reload.
    Disabled,
}

impl Default for BootstrapMode {
    fn default() -> Self {
        if cfg!(feature = "offline-kill-switch") {
            BootstrapMode::Disabled
        } else {
            BootstrapMode::Enabled
        }
    }
}

/// Bootstrapper options.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub mode: BootstrapMode,

    /// Call `update()` on the canonical registration after reconciling.
    pub force_update_check: bool,

    /// Reload once when a new worker takes control of the page.
    pub reload_on_controller_change: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            mode: BootstrapMode::default(),
            force_update_check: true,
            reload_on_controller_change: true,
        }
    }
}

/// What one bootstrap run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapReport {
    pub mode: BootstrapMode,
    /// The escape hatch ran.
    pub reset: bool,
    pub unregistered: Vec<Url>,
    pub registered: Option<Url>,
    pub update_checked: bool,
    pub caches_cleared: Vec<String>,
    pub reloaded: bool,
    /// Recovered failures, in order.
    pub errors: Vec<String>,
}

impl BootstrapReport {
    fn new(mode: BootstrapMode) -> Self {
        Self {
            mode,
            reset: false,
            unregistered: Vec::new(),
            registered: None,
            update_checked: false,
            caches_cleared: Vec::new(),
            reloaded: false,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, error: BootstrapError) {
        warn!(error = %error, "Bootstrap step failed");
        self.errors.push(error.to_string());
    }
}

/// Page-side registration bootstrapper.
pub struct Bootstrapper {
    config: OfflineConfig,
    options: BootstrapOptions,
    container: Arc<dyn RegistrationContainer>,
    page: Arc<dyn PageHost>,
    caches: SharedCacheStorage,
    reloaded: AtomicBool,
}

impl Bootstrapper {
    pub fn new(
        config: OfflineConfig,
        options: BootstrapOptions,
        container: Arc<dyn RegistrationContainer>,
        page: Arc<dyn PageHost>,
        caches: SharedCacheStorage,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            options,
            container,
            page,
            caches,
            reloaded: AtomicBool::new(false),
        })
    }

    /// Canonical script location for the current page.
    pub fn canonical_script(&self) -> Result<Url> {
        Ok(self.config.script_url(&self.page.location())?)
    }

    pub fn canonical_scope(&self) -> Result<Url> {
        Ok(self.config.scope_url(&self.page.location())?)
    }

    /// Script URL handed to `register`, cache-busted with the version token.
    pub fn registration_url(&self) -> Result<Url> {
        let mut url = self.canonical_script()?;
        if self.config.version.as_str() != DEFAULT_VERSION {
            url.query_pairs_mut()
                .append_pair(VERSION_PARAM, self.config.version.as_str());
        }
        Ok(url)
    }

    /// Whether the page URL carries the escape-hatch flag.
    pub fn reset_requested(&self) -> bool {
        self.page
            .location()
            .query_pairs()
            .any(|(key, _)| key == self.config.reset_flag.as_str())
    }

    /// Run the bootstrap sequence.
    ///
    /// Only an unresolvable canonical location is an error; container
    /// failures are logged and collected in the report.
    pub async fn run(&self) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::new(self.options.mode);

        if self.options.mode == BootstrapMode::Disabled {
            debug!("Offline support disabled, removing workers");
            self.tear_down(&mut report).await;
            return Ok(report);
        }

        if self.reset_requested() {
            self.reset(&mut report).await;
            return Ok(report);
        }

        // A later reset may reload again.
        self.page.session_remove(RESET_MARKER);
        self.reconcile(&mut report).await?;
        Ok(report)
    }

    async fn reconcile(&self, report: &mut BootstrapReport) -> Result<()> {
        let script = self.canonical_script()?;
        let scope = self.canonical_scope()?;

        let registrations = match self.container.registrations().await {
            Ok(registrations) => registrations,
            Err(e) => {
                report.record(e);
                Vec::new()
            }
        };

        // Registering is skipped only when the newest worker already runs
        // the exact cache-busted URL; any other version token re-registers.
        let target = self.registration_url()?;
        let mut installed = false;
        for registration in &registrations {
            if !registration.serves(&script, &scope) {
                self.unregister(registration, report).await;
            } else if registration.newest_script() == Some(&target) {
                installed = true;
            } else {
                debug!(
                    scope = %scope,
                    script = ?registration.newest_script().map(Url::as_str),
                    "Canonical worker has a stale version token"
                );
            }
        }

        if !installed {
            match self.container.register(&target, &scope).await {
                Ok(_) => {
                    info!(script = %target, scope = %scope, "Registered canonical worker");
                    report.registered = Some(target);
                    installed = true;
                }
                Err(e) => report.record(e),
            }
        }

        if installed && self.options.force_update_check {
            match self.container.update(&scope).await {
                Ok(()) => report.update_checked = true,
                Err(e) => report.record(e),
            }
        }
        Ok(())
    }

    /// Escape hatch: remove every worker and cache, then reload once.
    async fn reset(&self, report: &mut BootstrapReport) {
        report.reset = true;
        info!(flag = %self.config.reset_flag, "Resetting offline support");
        self.tear_down(report).await;

        if self.page.session_get(RESET_MARKER).is_some() {
            debug!("Reset already reloaded this session");
            return;
        }
        self.page.session_set(RESET_MARKER, "1");
        report.reloaded = self.reload_once();
    }

    async fn tear_down(&self, report: &mut BootstrapReport) {
        match self.container.registrations().await {
            Ok(registrations) => {
                for registration in &registrations {
                    self.unregister(registration, report).await;
                }
            }
            Err(e) => report.record(e),
        }
        report.caches_cleared = self.caches.write().await.clear();
        if !report.caches_cleared.is_empty() {
            info!(caches = ?report.caches_cleared, "Deleted cache partitions");
        }
    }

    async fn unregister(&self, registration: &Registration, report: &mut BootstrapReport) {
        let scope = &registration.scope;
        match self.container.unregister(scope).await {
            Ok(true) => {
                info!(scope = %scope, "Unregistered worker");
                report.unregistered.push(scope.clone());
            }
            Ok(false) => debug!(scope = %scope, "Registration already gone"),
            Err(e) => report.record(e),
        }
    }

    /// Handle a controller change; returns whether the page was reloaded.
    pub fn on_controller_change(&self) -> bool {
        if !self.options.reload_on_controller_change || self.options.mode == BootstrapMode::Disabled {
            return false;
        }
        self.reload_once()
    }

    /// Forward container events until the channel closes.
    pub async fn watch(&self, mut events: mpsc::UnboundedReceiver<ContainerEvent>) {
        while let Some(event) = events.recv().await {
            if let ContainerEvent::ControllerChange { worker_id } = event {
                debug!(worker = worker_id.raw(), "Controller changed");
                self.on_controller_change();
            }
        }
    }

    fn reload_once(&self) -> bool {
        if self.reloaded.swap(true, Ordering::SeqCst) {
            debug!("Page already reloaded once");
            return false;
        }
        info!("Reloading page");
        self.page.reload();
        true
    }
}
