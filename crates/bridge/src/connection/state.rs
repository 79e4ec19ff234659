use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::engine::Socket;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process unique identifier of an accepted exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a [`Connection`], both `Aborted` and `Done` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Aborted,
    Done,
}

const OPEN: u8 = 0;
const ABORTED: u8 = 1;
const DONE: u8 = 2;

/// One accepted socket exchange.
///
/// A connection moves from `Open` to exactly one terminal state. The transition methods report
/// whether the calling site performed the transition, so bookkeeping tied to it (registry
/// removal, cancellation) runs once no matter how many paths race towards the end.
pub struct Connection {
    id: ConnectionId,
    socket: Arc<dyn Socket>,
    state: AtomicU8,
    writing: AtomicBool,
    signal: CancellationToken,
    abort_listeners: Mutex<Vec<AbortListener>>,
}

type AbortListener = Box<dyn FnOnce() + Send>;

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).field("state", &self.state()).finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(socket: Arc<dyn Socket>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            socket,
            state: AtomicU8::new(OPEN),
            writing: AtomicBool::new(false),
            signal: CancellationToken::new(),
            abort_listeners: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    /// Cancellation token shared with the request and its body, cancelled on abort.
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            ABORTED => ConnectionState::Aborted,
            _ => ConnectionState::Done,
        }
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.state.load(Ordering::Acquire) == ABORTED
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// True once either terminal state was reached, nothing may be written anymore.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != OPEN
    }

    /// Moves the connection to `Aborted`, cancels its signal and runs the abort listeners.
    pub fn mark_aborted(&self) -> bool {
        let transitioned = self.transition(ABORTED);
        if transitioned {
            trace!(connection = %self.id, "connection aborted");
            self.signal.cancel();
            let listeners = std::mem::take(&mut *self.listeners());
            for listener in listeners {
                listener();
            }
        }
        transitioned
    }

    /// Runs `listener` once the connection aborts, right away when it already has.
    ///
    /// Listeners are never run for a connection that ends `Done`.
    pub(crate) fn on_abort(&self, listener: AbortListener) {
        let mut listeners = self.listeners();
        if self.is_aborted() {
            drop(listeners);
            listener();
        } else if !self.is_done() {
            listeners.push(listener);
        }
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<AbortListener>> {
        self.abort_listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the connection to `Done`.
    pub fn mark_done(&self) -> bool {
        let transitioned = self.transition(DONE);
        if transitioned {
            trace!(connection = %self.id, "connection done");
        }
        transitioned
    }

    fn transition(&self, to: u8) -> bool {
        self.state.compare_exchange(OPEN, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Claims the single writer slot, returns a guard releasing it on drop.
    pub(crate) fn claim_writer(&self) -> Option<WriterGuard<'_>> {
        self.writing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| WriterGuard { writing: &self.writing })
    }
}

#[derive(Debug)]
pub(crate) struct WriterGuard<'conn> {
    writing: &'conn AtomicBool,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.writing.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockSocket;

    #[test]
    fn ids_are_unique() {
        let a = Connection::new(MockSocket::new());
        let b = Connection::new(MockSocket::new());
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("conn-"));
    }

    #[test]
    fn only_one_terminal_transition() {
        let conn = Connection::new(MockSocket::new());
        assert_eq!(conn.state(), ConnectionState::Open);

        assert!(conn.mark_aborted());
        assert!(!conn.mark_aborted());
        assert!(!conn.mark_done());

        assert_eq!(conn.state(), ConnectionState::Aborted);
        assert!(conn.is_closed());
        assert!(!conn.is_done());
    }

    #[test]
    fn abort_cancels_signal_but_done_does_not() {
        let done = Connection::new(MockSocket::new());
        assert!(done.mark_done());
        assert!(!done.signal().is_cancelled());

        let aborted = Connection::new(MockSocket::new());
        assert!(aborted.mark_aborted());
        assert!(aborted.signal().is_cancelled());
    }

    #[test]
    fn abort_listeners_run_once() {
        use std::sync::atomic::AtomicUsize;

        let conn = Connection::new(MockSocket::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        conn.on_abort(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        conn.mark_aborted();
        conn.mark_aborted();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // registered late, runs immediately
        let counter = Arc::clone(&calls);
        conn.on_abort(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writer_slot_is_exclusive() {
        let conn = Connection::new(MockSocket::new());
        let guard = conn.claim_writer();
        assert!(guard.is_some());
        assert!(conn.claim_writer().is_none());

        drop(guard);
        assert!(conn.claim_writer().is_some());
    }
}
