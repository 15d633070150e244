//! Registry of connected clients.
//!
//! Membership is tied to a [`Registration`] guard: a client is in the registry
//! exactly as long as its guard is alive, so teardown runs on every exit path
//! of the connection loop, including panics and early returns.

use crate::error::SendError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outbound half of a client connection.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Send one text frame to the client.
    async fn send_text(&self, text: &str) -> Result<(), SendError>;
}

/// Registry-assigned identifier. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    clients: HashMap<ClientId, Arc<dyn ClientSink>>,
    next_id: u64,
}

/// Set of currently connected clients.
///
/// Cloning is cheap and yields a handle to the same set.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic midway, so the data is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a client. It stays registered until the returned guard is dropped.
    pub fn add(&self, sink: Arc<dyn ClientSink>) -> Registration {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ClientId(inner.next_id);
        inner.clients.insert(id, sink);

        Registration {
            id,
            registry: self.clone(),
        }
    }

    /// Remove a client. Returns false if it was already gone.
    pub fn remove(&self, id: ClientId) -> bool {
        self.lock().clients.remove(&id).is_some()
    }

    /// Current membership, detached from the registry.
    pub fn snapshot(&self) -> Vec<(ClientId, Arc<dyn ClientSink>)> {
        self.lock()
            .clients
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().clients.is_empty()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().clients.contains_key(&id)
    }
}

/// Scoped registry membership. Dropping it removes the client.
pub struct Registration {
    id: ClientId,
    registry: ClientRegistry,
}

impl Registration {
    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
