//! In-memory engine that records every call made through the [`Socket`] boundary.
//!
//! Nothing here does I/O: a test plays the role of the event loop by pushing request chunks,
//! firing writable callbacks and aborting sockets by hand.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};

use super::{AbortCallback, Acceptor, DataCallback, Engine, Listener, RequestMeta, Socket, TryEnd, WritableCallback};
use crate::protocol::EngineError;

/// A single call observed by a [`MockSocket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    CorkStart,
    CorkEnd,
    Status(String),
    Header(String, String),
    Write(Bytes),
    TryEnd { chunk: Bytes, total_len: usize },
    EndWithoutBody,
    Pause,
    Resume,
    Close,
}

#[derive(Default)]
struct State {
    events: Vec<SocketEvent>,
    received: BytesMut,
    on_aborted: Option<AbortCallback>,
    on_data: Option<DataCallback>,
    on_writable: Option<WritableCallback>,
    pending_data: VecDeque<(Bytes, bool)>,
    rejected_writes: usize,
    try_end_capacity: Option<usize>,
    body_offset: usize,
    keep_alive: bool,
    fail_close: bool,
    aborted: bool,
    closed: bool,
}

#[derive(Default)]
pub struct MockSocket {
    state: Mutex<State>,
}

impl std::fmt::Debug for MockSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockSocket").field("events", &state.events.len()).field("closed", &state.closed).finish()
    }
}

impl MockSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` calls to [`Socket::write`] report a full write buffer.
    pub fn reject_writes(&self, count: usize) {
        self.state().rejected_writes = count;
    }

    /// Every [`Socket::try_end`] call takes at most `capacity` bytes.
    pub fn limit_try_end(&self, capacity: usize) {
        self.state().try_end_capacity = Some(capacity);
    }

    /// A fully written response leaves the exchange open instead of completing it.
    pub fn keep_alive(&self) {
        self.state().keep_alive = true;
    }

    pub fn fail_close(&self) {
        self.state().fail_close = true;
    }

    pub fn events(&self) -> Vec<SocketEvent> {
        self.state().events.clone()
    }

    pub fn count(&self, event: &SocketEvent) -> usize {
        self.state().events.iter().filter(|e| *e == event).count()
    }

    /// Body bytes the peer would have received, in order.
    pub fn received(&self) -> Bytes {
        self.state().received.clone().freeze()
    }

    pub fn status(&self) -> Option<String> {
        self.state().events.iter().find_map(|e| match e {
            SocketEvent::Status(status) => Some(status.clone()),
            _ => None,
        })
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state().events.iter().find_map(|e| match e {
            SocketEvent::Header(key, value) if key.eq_ignore_ascii_case(name) => Some(value.clone()),
            _ => None,
        })
    }

    /// Number of write attempts of any kind, including the final end.
    pub fn write_attempts(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| matches!(e, SocketEvent::Write(_) | SocketEvent::TryEnd { .. } | SocketEvent::EndWithoutBody))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn has_writable_callback(&self) -> bool {
        self.state().on_writable.is_some()
    }

    /// Delivers a request body chunk, or keeps it until a data callback is installed.
    pub fn push_data(&self, chunk: &[u8], is_last: bool) {
        let callback = {
            let mut state = self.state();
            match state.on_data.take() {
                Some(callback) => callback,
                None => {
                    state.pending_data.push_back((Bytes::copy_from_slice(chunk), is_last));
                    return;
                }
            }
        };
        self.deliver(callback, std::iter::once((Bytes::copy_from_slice(chunk), is_last)));
    }

    fn deliver(&self, mut callback: DataCallback, chunks: impl IntoIterator<Item = (Bytes, bool)>) {
        for (chunk, is_last) in chunks {
            callback(&chunk, is_last);
        }
        let mut state = self.state();
        if state.on_data.is_none() {
            state.on_data = Some(callback);
        }
    }

    /// Invokes the pending writable callback, returns false when none was registered.
    pub fn fire_writable(&self) -> bool {
        let (callback, offset) = {
            let mut state = self.state();
            (state.on_writable.take(), state.body_offset)
        };
        match callback {
            Some(callback) => {
                callback(offset);
                true
            }
            None => false,
        }
    }

    /// Simulates the peer going away.
    pub fn abort(&self) {
        let callback = {
            let mut state = self.state();
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.on_writable = None;
            state.on_aborted.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Socket for MockSocket {
    fn on_aborted(&self, callback: AbortCallback) {
        self.state().on_aborted = Some(callback);
    }

    fn on_data(&self, callback: DataCallback) {
        let pending: Vec<_> = self.state().pending_data.drain(..).collect();
        self.deliver(callback, pending);
    }

    fn on_writable(&self, callback: WritableCallback) {
        let mut state = self.state();
        if !state.aborted {
            state.on_writable = Some(callback);
        }
    }

    fn pause(&self) {
        self.state().events.push(SocketEvent::Pause);
    }

    fn resume(&self) {
        self.state().events.push(SocketEvent::Resume);
    }

    fn write_status(&self, status: &str) {
        self.state().events.push(SocketEvent::Status(status.to_string()));
    }

    fn write_header(&self, name: &str, value: &[u8]) {
        self.state().events.push(SocketEvent::Header(name.to_string(), String::from_utf8_lossy(value).into_owned()));
    }

    fn write(&self, chunk: &[u8]) -> bool {
        let mut state = self.state();
        state.events.push(SocketEvent::Write(Bytes::copy_from_slice(chunk)));
        state.received.extend_from_slice(chunk);
        state.body_offset += chunk.len();
        if state.rejected_writes > 0 {
            state.rejected_writes -= 1;
            return false;
        }
        true
    }

    fn try_end(&self, chunk: &[u8], total_len: usize) -> TryEnd {
        let mut state = self.state();
        state.events.push(SocketEvent::TryEnd { chunk: Bytes::copy_from_slice(chunk), total_len });
        let taken = state.try_end_capacity.map_or(chunk.len(), |capacity| capacity.min(chunk.len()));
        state.received.extend_from_slice(&chunk[..taken]);
        state.body_offset += taken;

        let accepted = taken == chunk.len();
        let completed = accepted && state.body_offset >= total_len && !state.keep_alive;
        TryEnd { accepted, completed }
    }

    fn end_without_body(&self) {
        self.state().events.push(SocketEvent::EndWithoutBody);
    }

    fn cork(&self, f: &mut dyn FnMut()) {
        self.state().events.push(SocketEvent::CorkStart);
        f();
        self.state().events.push(SocketEvent::CorkEnd);
    }

    fn close(&self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.events.push(SocketEvent::Close);
        if state.fail_close {
            return Err(EngineError::refused("close rejected by mock"));
        }
        if state.closed {
            return Err(EngineError::Closed);
        }
        state.closed = true;
        state.on_writable = None;
        Ok(())
    }
}

/// Engine whose accept loop is driven by [`MockEngine::connect`].
#[derive(Default)]
pub struct MockEngine {
    acceptor: Mutex<Option<(Acceptor, Arc<AtomicBool>)>>,
}

impl std::fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEngine").field("listening", &self.is_listening()).finish()
    }
}

#[derive(Debug)]
pub struct MockListener {
    port: u16,
    closed: Arc<AtomicBool>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accepts a new connection, returns `None` once the listener was closed.
    pub fn connect(&self, meta: RequestMeta) -> Option<Arc<MockSocket>> {
        let acceptor = {
            let guard = self.acceptor.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some((acceptor, closed)) if !closed.load(Ordering::Acquire) => Arc::clone(acceptor),
                _ => return None,
            }
        };
        let socket = MockSocket::new();
        acceptor(Arc::clone(&socket) as Arc<dyn Socket>, meta);
        Some(socket)
    }

    pub fn is_listening(&self) -> bool {
        let guard = self.acceptor.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().is_some_and(|(_, closed)| !closed.load(Ordering::Acquire))
    }
}

impl Engine for MockEngine {
    fn listen(&self, addr: SocketAddr, acceptor: Acceptor) -> Result<Box<dyn Listener>, EngineError> {
        let mut guard = self.acceptor.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|(_, closed)| !closed.load(Ordering::Acquire)) {
            return Err(EngineError::refused("address already in use"));
        }
        let closed = Arc::new(AtomicBool::new(false));
        *guard = Some((acceptor, Arc::clone(&closed)));
        let port = if addr.port() == 0 { 3000 } else { addr.port() };
        Ok(Box::new(MockListener { port, closed }))
    }
}

impl Listener for MockListener {
    fn local_port(&self) -> u16 {
        self.port
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
