//! Registry of position observers
//!
//! Every client owns a bounded channel of serialized JSON. Registration hands
//! out a `ClientGuard`; dropping it removes the client.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Messages buffered per client before new ones are dropped
pub const CLIENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Removes its client from the registry when dropped.
pub struct ClientGuard {
    id: ClientId,
    registry: ClientRegistry,
}

impl ClientGuard {
    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Thread-safe set of connected clients.
///
/// Broadcasting takes the read lock only; registration and removal take the
/// write lock and prune clients whose receiver is gone.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ClientId, mpsc::Sender<String>>>>,
    capacity: Option<usize>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose clients buffer `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Default::default()
        }
    }

    /// Add a client. Keep the guard alive as long as the client reads.
    pub fn register(&self) -> (ClientGuard, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.capacity.unwrap_or(CLIENT_BUFFER));
        let id = ClientId(Uuid::new_v4());
        {
            let mut clients = self.clients.write();
            clients.retain(|_, tx| !tx.is_closed());
            clients.insert(id, tx);
        }
        debug!("Client {} registered", id);

        let guard = ClientGuard {
            id,
            registry: self.clone(),
        };
        (guard, rx)
    }

    /// Remove a client. Called automatically by `ClientGuard::drop`.
    pub fn remove(&self, id: &ClientId) {
        let mut clients = self.clients.write();
        if clients.remove(id).is_some() {
            debug!("Client {} removed", id);
        }
        clients.retain(|_, tx| !tx.is_closed());
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Serialize `value` once and offer it to every client without waiting.
    ///
    /// Returns how many clients accepted the message.
    pub fn broadcast<T: Serialize>(&self, value: &T) -> Result<usize, serde_json::Error> {
        let message = serde_json::to_string(value)?;
        let clients = self.clients.read();

        let mut delivered = 0;
        for (id, tx) in clients.iter() {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Client {} is lagging, message dropped", id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!("Client {} is gone", id);
                }
            }
        }
        Ok(delivered)
    }
}
