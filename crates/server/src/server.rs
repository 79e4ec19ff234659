use std::error::Error;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use http::StatusCode;
use micro_bridge::connection::{Connection, ConnectionRegistry, ResponseWriter};
use micro_bridge::engine::{Acceptor, Engine, Listener, RequestMeta, Socket};
use micro_bridge::lifecycle::{DrainOutcome, drain};
use micro_bridge::protocol::{BoxError, Request, RequestError, RequestOptions, Response};
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ErrorVerbosity, ServerConfig};
use crate::handler::Handler;
use crate::shutdown::ShutdownHook;
use crate::{ServerError, StatusError};

const CLIENT_ERROR: &str = "Client Error";
const SERVER_ERROR: &str = "Server Error";

pub struct ServerBuilder {
    handler: Option<Arc<dyn Handler>>,
    engine: Option<Arc<dyn Engine>>,
    config: ServerConfig,
    shutdown_hooks: Vec<ShutdownHook>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { handler: None, engine: None, config: ServerConfig::default(), shutdown_hooks: Vec::new() }
    }

    #[must_use]
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn engine<E: Engine>(mut self, engine: Arc<E>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn shutdown_handler(mut self, hook: ShutdownHook) -> Self {
        self.shutdown_hooks.push(hook);
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        let handler = self.handler.ok_or(ServerError::MissingHandler)?;
        let engine = self.engine.ok_or(ServerError::MissingEngine)?;
        self.config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let writer = ResponseWriter::new(Arc::clone(&registry), self.config.resolve_options()?);

        Ok(Server {
            inner: Arc::new(Inner {
                handler,
                engine,
                request_options: self.config.request_options(),
                config: self.config,
                registry,
                writer,
                listener: Mutex::new(None),
                shutdown_hooks: Mutex::new(self.shutdown_hooks),
            }),
        })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Serves requests accepted by an [`Engine`] with a [`Handler`].
///
/// Cloning is cheap, every clone drives the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    handler: Arc<dyn Handler>,
    engine: Arc<dyn Engine>,
    config: ServerConfig,
    request_options: RequestOptions,
    registry: Arc<ConnectionRegistry>,
    writer: ResponseWriter,
    listener: Mutex<Option<Box<dyn Listener>>>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Starts accepting connections, returns the bound address.
    ///
    /// Requests run on the tokio runtime this is called from.
    pub fn listen(&self) -> Result<SocketAddr, ServerError> {
        let mut listener = lock(&self.inner.listener);
        if listener.is_some() {
            warn!("server already listening");
            return Err(ServerError::AlreadyListening);
        }

        let runtime = Handle::try_current()?;
        let server = Arc::downgrade(&self.inner);
        let acceptor: Acceptor = Arc::new(move |socket: Arc<dyn Socket>, meta: RequestMeta| {
            if let Some(server) = server.upgrade() {
                server.accept(socket, meta, &runtime);
            }
        });

        let config = &self.inner.config;
        let bound = self.inner.engine.listen(SocketAddr::new(config.bind, config.port), acceptor)?;
        let address = SocketAddr::new(config.bind, bound.local_port());
        info!(%address, scheme = %config.scheme(), "server listening");

        *listener = Some(bound);
        Ok(address)
    }

    /// Stops accepting new connections, in-flight requests keep running.
    pub fn stop(&self) {
        if let Some(listener) = lock(&self.inner.listener).take() {
            listener.close();
            info!("listener closed");
        }
    }

    /// The bound address, `None` when not listening.
    pub fn address(&self) -> Option<SocketAddr> {
        lock(&self.inner.listener).as_ref().map(|listener| SocketAddr::new(self.inner.config.bind, listener.local_port()))
    }

    pub fn add_shutdown_handler(&self, hook: ShutdownHook) {
        lock(&self.inner.shutdown_hooks).push(hook);
    }

    /// Number of connections in flight.
    pub fn connections(&self) -> usize {
        self.inner.registry.size()
    }

    /// Graceful shutdown: stops listening, runs the shutdown hooks one after another, then
    /// drains the in-flight connections.
    ///
    /// A failing or panicking hook is logged and does not keep the others from running.
    pub async fn close(&self) -> DrainOutcome {
        info!("closing listener");
        self.stop();

        let hooks = std::mem::take(&mut *lock(&self.inner.shutdown_hooks));
        info!(hooks = hooks.len(), "running shutdown handlers");
        for hook in hooks {
            match AssertUnwindSafe(hook.run(self.clone())).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(cause = %e, "shutdown handler failed"),
                Err(panic) => error!(cause = %panic_error(panic.as_ref()), "shutdown handler panicked"),
            }
        }

        info!("draining connections");
        let outcome = drain(&self.inner.registry, self.inner.config.drain_timeout()).await;
        info!(?outcome, "shutdown complete");
        outcome
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address())
            .field("connections", &self.connections())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Runs on the engine's event loop for every accepted connection.
    fn accept(self: &Arc<Self>, socket: Arc<dyn Socket>, meta: RequestMeta, runtime: &Handle) {
        let connection = Connection::new(socket);

        let registry = Arc::clone(&self.registry);
        let aborted = Arc::downgrade(&connection);
        connection.socket().on_aborted(Box::new(move || {
            if let Some(connection) = aborted.upgrade() {
                if connection.mark_aborted() {
                    debug!(connection = %connection.id(), "client went away");
                }
                registry.remove(connection.id());
            }
        }));

        self.registry.add(Arc::clone(&connection));
        trace!(connection = %connection.id(), method = %meta.method, path = %meta.path, "accepted connection");

        let request = Request::from_meta(meta, Arc::clone(&connection), &self.request_options);
        let server = Arc::clone(self);
        runtime.spawn(async move { server.serve(connection, request).await });
    }

    async fn serve(&self, connection: Arc<Connection>, request: Result<Request, RequestError>) {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                debug!(connection = %connection.id(), cause = %e, "invalid request");
                return self.respond_error(&connection, StatusCode::BAD_REQUEST, &e).await;
            }
        };

        let response = match AssertUnwindSafe(self.handler.call(request)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(connection = %connection.id(), cause = %e, "handler failed");
                return self.respond_error(&connection, StatusCode::INTERNAL_SERVER_ERROR, e.as_ref()).await;
            }
            Err(panic) => {
                let e = panic_error(panic.as_ref());
                error!(connection = %connection.id(), cause = %e, "handler panicked");
                return self.respond_error(&connection, StatusCode::INTERNAL_SERVER_ERROR, e.as_ref()).await;
            }
        };

        match self.writer.write(&connection, response).await {
            Ok(()) => {}
            Err(e) if e.is_committed() => {
                error!(connection = %connection.id(), cause = %e, "response failed after headers were sent, closing connection");
                self.writer.abandon(&connection);
            }
            Err(e) => {
                error!(connection = %connection.id(), cause = %e, "response could not be written");
                self.respond_error(&connection, StatusCode::INTERNAL_SERVER_ERROR, &e).await;
            }
        }
    }

    async fn respond_error(&self, connection: &Connection, status: StatusCode, err: &(dyn Error + Send + Sync + 'static)) {
        let response = error_response(self.config.error_verbosity, status, err);
        if let Err(e) = self.writer.write(connection, response).await {
            error!(connection = %connection.id(), cause = %e, "failed to write error response, closing connection");
            self.writer.abandon(connection);
        }
    }
}

/// Builds the response for a failed exchange, a [`StatusError`] overrides `status`.
fn error_response(verbosity: ErrorVerbosity, status: StatusCode, err: &(dyn Error + 'static)) -> Response {
    let status = err.downcast_ref::<StatusError>().map_or(status, StatusError::status);
    let label = if status.is_client_error() { CLIENT_ERROR } else { SERVER_ERROR };

    let message = match verbosity {
        ErrorVerbosity::Hidden => label.to_string(),
        ErrorVerbosity::Message => format!("{label}: {err}"),
        ErrorVerbosity::Chain => {
            let mut message = format!("{label}: {err}");
            for source in std::iter::successors(err.source(), |e| (*e).source()) {
                message.push_str(": ");
                message.push_str(&source.to_string());
            }
            message
        }
    };

    Response::text(status, message)
}

fn panic_error(panic: &(dyn std::any::Any + Send)) -> BoxError {
    let reason = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {reason}").into()
}
