use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connection::ConnectionRegistry;

/// How a [`drain`] ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// nothing was in flight
    Empty,
    /// every connection finished before the timeout
    Drained,
    /// the timeout fired, `closed` connections were force-closed
    ForceClosed { closed: usize },
}

/// Waits for the registry to become empty, force-closing whatever is left after `timeout`.
///
/// Once the timer wins the remaining connections are aborted and removed, any empty
/// notification arriving afterwards is ignored.
pub async fn drain(registry: &ConnectionRegistry, timeout: Duration) -> DrainOutcome {
    // subscribe before looking, a removal in between is then either seen as empty or notified
    let mut emptied = registry.subscribe_empty();
    if registry.is_empty() {
        debug!("no connections in flight");
        return DrainOutcome::Empty;
    }

    info!(connections = registry.size(), timeout_ms = timeout.as_millis(), "draining connections");
    tokio::select! {
        () = emptied.emptied() => {
            info!("all connections drained");
            DrainOutcome::Drained
        }
        () = tokio::time::sleep(timeout) => force_close(registry),
    }
}

fn force_close(registry: &ConnectionRegistry) -> DrainOutcome {
    let remaining = registry.connections();
    warn!(connections = remaining.len(), "drain timed out, force closing connections");

    let mut closed = 0;
    for connection in remaining {
        if connection.mark_aborted() {
            closed += 1;
            if let Err(e) = connection.socket().close() {
                warn!(connection = %connection.id(), cause = %e, "failed to force close connection");
            }
        }
        registry.remove(connection.id());
    }

    DrainOutcome::ForceClosed { closed }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection::Connection;
    use crate::engine::Socket;
    use crate::engine::mock::{MockSocket, SocketEvent};

    fn open(registry: &ConnectionRegistry) -> (Arc<MockSocket>, Arc<Connection>) {
        let socket = MockSocket::new();
        let connection = Connection::new(Arc::clone(&socket) as Arc<dyn Socket>);
        registry.add(Arc::clone(&connection));
        (socket, connection)
    }

    #[tokio::test]
    async fn empty_registry_returns_immediately() {
        let registry = ConnectionRegistry::new();
        assert_eq!(drain(&registry, Duration::from_secs(10)).await, DrainOutcome::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn finishes_when_last_connection_ends() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (socket, connection) = open(&registry);

        let finisher = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            connection.mark_done();
            finisher.remove(connection.id());
        });

        let started = tokio::time::Instant::now();
        assert_eq!(drain(&registry, Duration::from_secs(10)).await, DrainOutcome::Drained);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(socket.count(&SocketEvent::Close), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_force_closes_the_rest() {
        let registry = ConnectionRegistry::new();
        let (first, a) = open(&registry);
        let (second, b) = open(&registry);
        second.fail_close();

        let outcome = drain(&registry, Duration::from_millis(100)).await;

        assert_eq!(outcome, DrainOutcome::ForceClosed { closed: 2 });
        assert!(registry.is_empty());
        assert!(a.is_aborted() && b.is_aborted());
        assert!(a.signal().is_cancelled());
        assert!(first.is_closed());
        // a failing close is logged, the connection is still dropped
        assert_eq!(second.count(&SocketEvent::Close), 1);
        assert!(!second.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn already_finished_connections_are_only_removed() {
        let registry = ConnectionRegistry::new();
        let (socket, connection) = open(&registry);
        // done but its removal never happened
        connection.mark_done();

        let outcome = drain(&registry, Duration::from_millis(10)).await;
        assert_eq!(outcome, DrainOutcome::ForceClosed { closed: 0 });
        assert_eq!(socket.count(&SocketEvent::Close), 0);
        assert!(registry.is_empty());
    }
}
