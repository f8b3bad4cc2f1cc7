//! Registration container (`navigator.serviceWorker`).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use nmc_sw::{WorkerId, WorkerState};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::error::{BootstrapError, Result};
use crate::registration::{Registration, WorkerHandle};

/// Page-side view of the worker registrations for an origin.
#[async_trait]
pub trait RegistrationContainer: Send + Sync {
    /// All registrations, in scope order.
    async fn registrations(&self) -> Result<Vec<Registration>>;

    /// Register `script_url` for `scope`.
    async fn register(&self, script_url: &Url, scope: &Url) -> Result<Registration>;

    /// Unregister the registration for `scope`; `false` if there was none.
    async fn unregister(&self, scope: &Url) -> Result<bool>;

    /// Ask the registration for `scope` to check for a new script.
    async fn update(&self, scope: &Url) -> Result<()>;
}

/// Container events.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    /// A new worker started installing.
    UpdateFound { scope: Url },
    /// The page is now controlled by a different worker.
    ControllerChange { worker_id: WorkerId },
}

/// In-process container.
///
/// Workers install instantly. A worker registered where none is active
/// becomes active and takes control; otherwise it waits.
pub struct InMemoryContainer {
    /// Registrations by scope.
    registrations: Arc<RwLock<Vec<Registration>>>,

    event_tx: mpsc::UnboundedSender<ContainerEvent>,
}

impl InMemoryContainer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ContainerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registrations: Arc::new(RwLock::new(Vec::new())),
                event_tx,
            },
            event_rx,
        )
    }

    /// Add a pre-existing registration, replacing any at the same scope.
    pub async fn insert(&self, registration: Registration) {
        let mut registrations = self.registrations.write().await;
        registrations.retain(|r| r.scope != registration.scope);
        registrations.push(registration);
        registrations.sort_by(|a, b| a.scope.as_str().cmp(b.scope.as_str()));
    }
}

#[async_trait]
impl RegistrationContainer for InMemoryContainer {
    async fn registrations(&self) -> Result<Vec<Registration>> {
        Ok(self.registrations.read().await.clone())
    }

    async fn register(&self, script_url: &Url, scope: &Url) -> Result<Registration> {
        if script_url.origin() != scope.origin() {
            return Err(BootstrapError::registration(format!(
                "script {script_url} is not same-origin with scope {scope}"
            )));
        }

        let mut registrations = self.registrations.write().await;
        let index = match registrations.iter().position(|r| r.scope == *scope) {
            Some(index) => index,
            None => {
                registrations.push(Registration::new(scope.clone()));
                registrations.len() - 1
            }
        };
        let registration = &mut registrations[index];

        let worker = WorkerHandle::new(script_url.clone(), WorkerState::Installed);
        let worker_id = worker.id;
        registration.last_update_check = Some(Instant::now());
        let _ = self.event_tx.send(ContainerEvent::UpdateFound {
            scope: scope.clone(),
        });

        if registration.active.is_none() {
            registration.active = Some(WorkerHandle {
                state: WorkerState::Activated,
                ..worker
            });
            let _ = self.event_tx.send(ContainerEvent::ControllerChange { worker_id });
        } else {
            registration.waiting = Some(worker);
        }
        info!(script = %script_url, scope = %scope, worker = worker_id.raw(), "Registered worker");

        let registration = registration.clone();
        registrations.sort_by(|a, b| a.scope.as_str().cmp(b.scope.as_str()));
        Ok(registration)
    }

    async fn unregister(&self, scope: &Url) -> Result<bool> {
        let mut registrations = self.registrations.write().await;
        let Some(index) = registrations.iter().position(|r| r.scope == *scope) else {
            return Ok(false);
        };
        let mut registration = registrations.remove(index);
        let detached = registration.unregister();
        debug!(scope = %scope, workers = detached.len(), "Unregistered");
        Ok(true)
    }

    async fn update(&self, scope: &Url) -> Result<()> {
        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .iter_mut()
            .find(|r| r.scope == *scope)
            .ok_or_else(|| BootstrapError::NotFound(scope.to_string()))?;
        registration.last_update_check = Some(Instant::now());
        debug!(scope = %scope, "Update check");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_first_registration_takes_control() {
        let (container, mut rx) = InMemoryContainer::new();
        let scope = url("https://nmc.example/nmc/");

        let registration = container
            .register(&url("https://nmc.example/nmc/service-worker.js"), &scope)
            .await
            .unwrap();

        let active = registration.active.unwrap();
        assert_eq!(active.state, WorkerState::Activated);
        assert_eq!(
            rx.recv().await,
            Some(ContainerEvent::UpdateFound { scope })
        );
        assert_eq!(
            rx.recv().await,
            Some(ContainerEvent::ControllerChange {
                worker_id: active.id
            })
        );
    }

    #[tokio::test]
    async fn test_second_registration_waits() {
        let (container, _rx) = InMemoryContainer::new();
        let scope = url("https://nmc.example/nmc/");
        let script = url("https://nmc.example/nmc/service-worker.js");

        container.register(&script, &scope).await.unwrap();
        let registration = container.register(&script, &scope).await.unwrap();

        assert!(registration.active.is_some());
        assert_eq!(registration.waiting.unwrap().state, WorkerState::Installed);
        assert_eq!(container.registrations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cross_origin_script_rejected() {
        let (container, _rx) = InMemoryContainer::new();
        let err = container
            .register(
                &url("https://cdn.example/service-worker.js"),
                &url("https://nmc.example/nmc/"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::RegistrationFailed(_)));
    }

    #[tokio::test]
    async fn test_unregister_and_update_unknown_scope() {
        let (container, _rx) = InMemoryContainer::new();
        let scope = url("https://nmc.example/nmc/");

        assert!(!container.unregister(&scope).await.unwrap());
        assert!(matches!(
            container.update(&scope).await,
            Err(BootstrapError::NotFound(_))
        ));
    }
}
