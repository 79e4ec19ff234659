//! Outbound write loop.
//!
//! [`ResponseWriter`] resolves a [`Response`] and pushes it through the engine's non-blocking
//! write API, honoring its backpressure signal:
//!
//! - status line and headers go out in one cork together with the first body write attempt
//! - a buffered body is retried from the offset the engine reports, accepted bytes are never
//!   sent twice
//! - a streamed body is pulled one chunk at a time, a rejected write waits for writability
//!   before the next pull
//! - every asynchronous resumption re-enters a fresh cork and first checks whether the
//!   connection is still open

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::oneshot;
use tracing::{debug, trace, warn};

use super::{Connection, ConnectionRegistry};
use crate::body::{BoxByteStream, Payload, ResolveOptions, resolve};
use crate::engine::{Socket, TryEnd};
use crate::protocol::{Parts, Response, ResponseError};

#[derive(Debug)]
pub struct ResponseWriter {
    registry: Arc<ConnectionRegistry>,
    options: ResolveOptions,
}

impl ResponseWriter {
    pub fn new(registry: Arc<ConnectionRegistry>, options: ResolveOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Writes `response` on `connection`.
    ///
    /// Returns `Ok` when the response was fully handed to the engine and also when the
    /// connection ended underneath it: a write towards a gone peer is not an error. Failures
    /// that happen before any byte was written leave the connection open, so the caller can
    /// still answer with an error response.
    pub async fn write(&self, connection: &Connection, response: Response) -> Result<(), ResponseError> {
        if connection.is_closed() {
            trace!(connection = %connection.id(), "connection closed before write, response dropped");
            return Ok(());
        }

        let Some(_writer) = connection.claim_writer() else {
            return Err(ResponseError::ConcurrentWrite);
        };

        let status = response.status().as_u16();
        if !(100..=599).contains(&status) {
            return Err(ResponseError::InvalidStatus { status });
        }

        let (mut parts, body) = response.into_parts();
        let payload = resolve(body, &mut parts.headers, &self.options).await?;

        if connection.is_closed() {
            trace!(connection = %connection.id(), "connection closed while resolving body");
            return Ok(());
        }

        debug!(connection = %connection.id(), status = %parts.status_line, len = ?payload.len(), "writing response");
        match payload {
            Payload::Empty => {
                let socket = connection.socket();
                socket.cork(&mut || {
                    write_head(socket.as_ref(), &parts);
                    socket.end_without_body();
                });
                self.finish(connection);
                Ok(())
            }
            Payload::Buffer(bytes) => {
                self.write_buffer(connection, &parts, bytes).await;
                Ok(())
            }
            Payload::Stream(stream) => self.write_stream(connection, &parts, stream).await,
        }
    }

    async fn write_buffer(&self, connection: &Connection, parts: &Parts, bytes: Bytes) {
        let socket = connection.socket();
        let total_len = bytes.len();
        let mut offset = 0;
        let mut head = Some(parts);

        loop {
            let chunk = &bytes[offset..];
            let mut result = TryEnd { accepted: false, completed: false };
            socket.cork(&mut || {
                if let Some(parts) = head.take() {
                    write_head(socket.as_ref(), parts);
                }
                result = socket.try_end(chunk, total_len);
            });

            if result.completed {
                self.finish(connection);
                return;
            }

            if result.accepted {
                trace!(connection = %connection.id(), "body accepted, engine keeps the exchange open");
                return;
            }

            match writable(connection).await {
                Some(reported) => offset = reported.min(total_len),
                None => return,
            }

            if connection.is_closed() {
                return;
            }
            trace!(connection = %connection.id(), offset, total_len, "resuming buffered write");
        }
    }

    async fn write_stream(&self, connection: &Connection, parts: &Parts, mut stream: BoxByteStream) -> Result<(), ResponseError> {
        let socket = connection.socket();
        socket.cork(&mut || write_head(socket.as_ref(), parts));

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                () = connection.signal().cancelled() => {
                    trace!(connection = %connection.id(), "connection aborted while pulling body stream");
                    return Ok(());
                }
            };

            if connection.is_closed() {
                return Ok(());
            }

            match next {
                None => {
                    socket.cork(&mut || socket.end_without_body());
                    self.finish(connection);
                    return Ok(());
                }
                Some(Err(e)) => return Err(ResponseError::stream(e)),
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => {
                    let mut accepted = false;
                    socket.cork(&mut || accepted = socket.write(&chunk));

                    if !accepted && writable(connection).await.is_none() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Marks the connection done and de-registers it, once.
    fn finish(&self, connection: &Connection) {
        if connection.mark_done() {
            self.registry.remove(connection.id());
        }
    }

    /// Gives up on a connection whose response can no longer be completed.
    pub fn abandon(&self, connection: &Connection) {
        if connection.mark_aborted() {
            if let Err(e) = connection.socket().close() {
                warn!(connection = %connection.id(), cause = %e, "failed to close abandoned connection");
            }
        }
        self.registry.remove(connection.id());
    }
}

fn write_head(socket: &dyn Socket, parts: &Parts) {
    socket.write_status(&parts.status_line);
    for (name, value) in &parts.headers {
        socket.write_header(name.as_str(), value.as_bytes());
    }
}

/// Waits for the engine to accept writes again, returns the body offset it reports.
///
/// `None` when the connection aborted or the engine dropped the callback.
async fn writable(connection: &Connection) -> Option<usize> {
    let (tx, rx) = oneshot::channel();
    connection.socket().on_writable(Box::new(move |offset| {
        let _ = tx.send(offset);
    }));

    tokio::select! {
        offset = rx => offset.ok(),
        () = connection.signal().cancelled() => None,
    }
}
