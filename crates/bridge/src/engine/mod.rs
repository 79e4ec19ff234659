//! Boundary with the native socket/HTTP engine.
//!
//! The engine owns the wire: it parses requests, frames responses and runs a single event loop
//! that invokes every callback registered here. This module only describes what the bridge
//! consumes from it.
//!
//! # Components
//!
//! - [`Socket`]: one accepted exchange, push style callbacks plus non-blocking writes
//! - [`RequestMeta`]: raw request accessors captured when the connection is accepted
//! - [`Engine`] and [`Listener`]: the accept loop and its stop switch
//!
//! # Contract
//!
//! - callbacks for one socket never run concurrently with each other
//! - the offset handed to a writable callback is the number of body bytes of the current
//!   response the engine has accepted so far
//! - a pending writable callback is dropped when the connection goes away
//! - chunks arriving before a data callback is installed are kept and delivered once it is

use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::EngineError;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

/// Invoked once when the peer disconnects or the engine aborts the exchange.
pub type AbortCallback = Box<dyn FnOnce() + Send>;

/// Invoked for every raw chunk of the request body, `is_last` marks the final one.
pub type DataCallback = Box<dyn FnMut(&[u8], bool) + Send>;

/// One-shot callback invoked when a rejected write may be retried.
pub type WritableCallback = Box<dyn FnOnce(usize) + Send>;

/// Receives every accepted connection together with its request metadata.
pub type Acceptor = Arc<dyn Fn(Arc<dyn Socket>, RequestMeta) + Send + Sync>;

/// Outcome of [`Socket::try_end`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TryEnd {
    /// every byte handed over was taken by the engine
    pub accepted: bool,
    /// the engine considers the response finished
    pub completed: bool,
}

pub trait Socket: Debug + Send + Sync + 'static {
    fn on_aborted(&self, callback: AbortCallback);

    fn on_data(&self, callback: DataCallback);

    fn on_writable(&self, callback: WritableCallback);

    /// Stops the delivery of request body chunks.
    fn pause(&self);

    /// Restarts the delivery of request body chunks.
    fn resume(&self);

    fn write_status(&self, status: &str);

    fn write_header(&self, name: &str, value: &[u8]);

    /// Writes a body chunk without ending the response, returns false when the engine's
    /// write buffer is full.
    fn write(&self, chunk: &[u8]) -> bool;

    /// Writes the tail of a response whose body is `total_len` bytes long.
    fn try_end(&self, chunk: &[u8], total_len: usize) -> TryEnd;

    fn end_without_body(&self);

    /// Runs `f` inside a batched write unit, writes issued by `f` are flushed together.
    fn cork(&self, f: &mut dyn FnMut());

    /// Forcibly closes the connection.
    fn close(&self) -> Result<(), EngineError>;
}

/// Raw request data handed over by the engine on accept.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
}

impl RequestMeta {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self { method: method.into(), path: path.into(), query: String::new(), headers: Vec::new() }
    }

    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

pub trait Engine: Send + Sync + 'static {
    /// Binds `addr` and starts delivering accepted connections to `acceptor`.
    fn listen(&self, addr: SocketAddr, acceptor: Acceptor) -> Result<Box<dyn Listener>, EngineError>;
}

pub trait Listener: Debug + Send + Sync {
    fn local_port(&self) -> u16;

    /// Stops accepting new connections, irreversible.
    fn close(&self);
}
