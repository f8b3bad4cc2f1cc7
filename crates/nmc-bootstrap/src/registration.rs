//! Worker registrations as seen from the page.

use std::time::Instant;

use nmc_common::VERSION_PARAM;
use nmc_sw::{WorkerId, WorkerState};
use serde::Serialize;
use url::Url;

/// A worker attached to a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub script_url: Url,
    pub state: WorkerState,
}

impl WorkerHandle {
    pub fn new(script_url: Url, state: WorkerState) -> Self {
        Self {
            id: WorkerId::next(),
            script_url,
            state,
        }
    }
}

/// A service worker registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<WorkerHandle>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<WorkerHandle>,

    /// Active worker.
    pub active: Option<WorkerHandle>,

    /// Last update check time.
    pub last_update_check: Option<Instant>,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    /// Registration with an already active worker.
    pub fn with_active(scope: Url, script_url: Url) -> Self {
        Self {
            active: Some(WorkerHandle::new(script_url, WorkerState::Activated)),
            ..Self::new(scope)
        }
    }

    /// Script URLs of the installing, waiting, and active workers.
    pub fn script_urls(&self) -> impl Iterator<Item = &Url> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .map(|worker| &worker.script_url)
    }

    /// Script of the most recently registered worker.
    pub fn newest_script(&self) -> Option<&Url> {
        self.script_urls().next()
    }

    /// Whether every worker of this registration runs `canonical`.
    ///
    /// A registration with no worker at all runs nothing.
    pub fn runs_script(&self, canonical: &Url) -> bool {
        let mut scripts = self.script_urls().peekable();
        scripts.peek().is_some() && scripts.all(|script| same_script(script, canonical))
    }

    /// Whether this registration already serves `canonical` at `scope`.
    pub fn serves(&self, canonical: &Url, scope: &Url) -> bool {
        self.scope == *scope && self.runs_script(canonical)
    }

    /// Detach every worker, returning them marked redundant.
    pub fn unregister(&mut self) -> Vec<WorkerHandle> {
        [&mut self.installing, &mut self.waiting, &mut self.active]
            .into_iter()
            .filter_map(Option::take)
            .map(|worker| WorkerHandle {
                state: WorkerState::Redundant,
                ..worker
            })
            .collect()
    }
}

/// Compare script URLs, ignoring the cache-busting version parameter.
pub fn same_script(a: &Url, b: &Url) -> bool {
    strip_version(a) == strip_version(b)
}

/// Drop the cache-busting version parameter, keeping any other query.
pub fn strip_version(url: &Url) -> Url {
    let mut stripped = url.clone();
    stripped.set_fragment(None);
    let rest: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != VERSION_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if rest.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(rest);
    }
    stripped
}
