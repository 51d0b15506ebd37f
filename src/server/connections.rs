use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::web::models::websocket_models::ServerEvent;

/// Outbound queue depth per connection. A client that falls this far behind
/// misses pushes rather than stalling the broadcaster.
const OUTBOUND_BUFFER: usize = 32;

/// Every live gateway connection, keyed by a per-connection id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, mpsc::Sender<ServerEvent>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection and returns its id with the receiving end of its queue.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let id = Uuid::new_v4();
        self.connections.insert(id, tx);
        debug!(connection_id = %id, total = self.connections.len(), "Connection registered.");
        (id, rx)
    }

    pub fn unregister(&self, id: Uuid) {
        if self.connections.remove(&id).is_some() {
            debug!(connection_id = %id, total = self.connections.len(), "Connection unregistered.");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queues `event` on every connection and returns how many accepted it.
    /// Connections whose receiver is gone are dropped from the registry.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.connections.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection_id = %entry.key(), "Outbound queue full, dropping push.");
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Removal must wait until the iterator has released its shard locks.
        for id in closed {
            self.unregister(id);
        }
        delivered
    }
}
