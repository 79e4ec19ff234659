//! Streaming I/O bridge between a callback driven HTTP engine and request/response handlers
//!
//! A native engine parses HTTP, owns the sockets and reports everything through callbacks on a
//! single event loop. Handlers on the other side want a request value with a pull based body
//! and answer with a response value. This crate sits in between and keeps both sides honest
//! about flow control.
//!
//! # Features
//!
//! - Response bodies of many shapes (text, JSON, binary, readers, streams, deferred values)
//!   resolved into exactly what the engine can send
//! - Backpressure aware writes that resume from the offset the engine reports
//! - Request bodies exposed as `http_body::Body` / `futures::Stream` with pause/resume
//! - A connection registry and a drain coordinator for graceful shutdown
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use micro_bridge::body::ResolveOptions;
//! use micro_bridge::connection::{Connection, ConnectionRegistry, ResponseWriter};
//! use micro_bridge::engine::{RequestMeta, Socket};
//! use micro_bridge::lifecycle::drain;
//! use micro_bridge::protocol::{Request, RequestOptions, Response};
//!
//! async fn serve(registry: Arc<ConnectionRegistry>, socket: Arc<dyn Socket>, meta: RequestMeta) {
//!     let connection = Connection::new(socket);
//!     registry.add(Arc::clone(&connection));
//!
//!     let writer = ResponseWriter::new(Arc::clone(&registry), ResolveOptions::default());
//!     let request = Request::from_meta(meta, Arc::clone(&connection), &RequestOptions::default()).unwrap();
//!
//!     let name = request.text().await.unwrap_or_default();
//!     writer.write(&connection, Response::new(format!("hello {name}"))).await.unwrap();
//!
//!     drain(&registry, Duration::from_secs(10)).await;
//! }
//! ```
//!
//! # Architecture
//!
//! - [`engine`]: what the bridge consumes from the native engine
//! - [`connection`]: connection state, the live connection registry and the write loop
//! - [`body`]: inbound body bridge, response body shapes and their resolution
//! - [`protocol`]: request and response values, error types
//! - [`lifecycle`]: draining in-flight connections on shutdown
//!
//! # Error Handling
//!
//! - [`protocol::RequestError`]: malformed client input, body consumption and aborts
//! - [`protocol::ResponseError`]: response bodies that cannot be sent
//! - [`protocol::EngineError`]: failures reported by the engine itself

pub mod body;
pub mod connection;
pub mod engine;
pub mod lifecycle;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
