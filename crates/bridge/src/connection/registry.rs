use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use super::{Connection, ConnectionId};

/// Tracks live connections for graceful shutdown.
///
/// The registry is the only structure shared across requests. Removing the last entry bumps an
/// "empty" epoch while the lock is still held, so a drain waiting on [`EmptySignal`] can never
/// miss the transition.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    empty: watch::Sender<u64>,
}

/// Receives one notification per transition of the registry to empty.
#[derive(Debug)]
pub struct EmptySignal {
    receiver: watch::Receiver<u64>,
}

impl EmptySignal {
    /// Waits for the next transition to empty that happened after this signal was created.
    pub async fn emptied(&mut self) {
        // the sender lives in the registry, which outlives every subscriber that borrows it
        if self.receiver.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (empty, _) = watch::channel(0);
        Self { connections: Mutex::new(HashMap::new()), empty }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, connection: Arc<Connection>) {
        let mut connections = self.guard();
        connections.insert(connection.id(), connection);
    }

    /// Removes a connection, returns false when it was not registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut connections = self.guard();
        let removed = connections.remove(&id).is_some();
        if removed && connections.is_empty() {
            debug!(connection = %id, "last connection removed, registry empty");
            self.empty.send_modify(|epoch| *epoch += 1);
        }
        removed
    }

    pub fn size(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.guard().values().cloned().collect()
    }

    pub fn subscribe_empty(&self) -> EmptySignal {
        EmptySignal { receiver: self.empty.subscribe() }
    }

    /// Number of transitions to empty observed so far.
    pub fn empty_transitions(&self) -> u64 {
        *self.empty.borrow()
    }
}
