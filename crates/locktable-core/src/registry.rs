//! Registry of live clients, consulted by the diagnostic dump.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::client::{ClientId, ClientState};

/// Tracks the clients of one or more lock managers.
///
/// Clients register on creation and unregister on `close`/drop. Entries are
/// weak, so a registry never keeps a client's state alive. Client ids are
/// handed out by the registry, so they stay unique across every manager
/// sharing it.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<FxHashMap<ClientId, Weak<ClientState>>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, client: &Arc<ClientState>) {
        self.clients.write().insert(client.id(), Arc::downgrade(client));
    }

    pub(crate) fn unregister(&self, id: ClientId) {
        self.clients.write().remove(&id);
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Returns `true` if no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Ids and names of registered clients, ordered by id.
    #[must_use]
    pub fn client_names(&self) -> Vec<(ClientId, String)> {
        self.live_clients()
            .iter()
            .map(|client| (client.id(), client.name().to_string()))
            .collect()
    }

    /// Registered clients that are still alive, ordered by id.
    pub(crate) fn live_clients(&self) -> Vec<Arc<ClientState>> {
        let mut clients: Vec<Arc<ClientState>> = self
            .clients
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        clients.sort_by_key(|client| client.id());
        clients
    }
}
