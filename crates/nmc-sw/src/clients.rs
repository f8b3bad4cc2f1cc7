//! Clients API: pages of the origin and which worker controls them.

use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::RwLock;
use url::Url;

use crate::worker::WorkerId;

/// Client list shared by the host and the worker.
pub type SharedClients = Arc<RwLock<Clients>>;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker currently controlling this client.
    pub controller: Option<WorkerId>,
}

impl Client {
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            controller: None,
        }
    }

    fn in_scope(&self, scope: &Url) -> bool {
        self.url.origin() == scope.origin() && self.url.path().starts_with(scope.path())
    }
}

/// A client whose controller changed during `claim`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerChange {
    pub client_id: String,
    pub previous: Option<WorkerId>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedClients {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Window clients within `scope`, controlled or not.
    pub fn in_scope(&self, scope: &Url) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.client_type == ClientType::Window && c.in_scope(scope))
            .collect()
    }

    /// Clients in `scope` controlled by `worker`.
    pub fn controlled_by(&self, worker: WorkerId, scope: &Url) -> usize {
        self.in_scope(scope)
            .iter()
            .filter(|c| c.controller == Some(worker))
            .count()
    }

    /// Make `worker` the controller of every window client in `scope`.
    ///
    /// Returns the clients whose controller changed.
    pub fn claim(&mut self, worker: WorkerId, scope: &Url) -> Vec<ControllerChange> {
        let mut changes: Vec<ControllerChange> = self
            .clients
            .values_mut()
            .filter(|c| c.client_type == ClientType::Window && c.in_scope(scope))
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                let previous = c.controller.replace(worker);
                ControllerChange {
                    client_id: c.id.clone(),
                    previous,
                }
            })
            .collect();
        changes.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        changes
    }
}
