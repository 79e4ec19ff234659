//! Request in, response out server on top of [`micro_bridge`].
//!
//! A [`Server`] takes connections from an [`Engine`](micro_bridge::engine::Engine), turns each
//! into a [`Request`](micro_bridge::protocol::Request), hands it to a [`Handler`] and writes the
//! returned [`Response`](micro_bridge::protocol::Response) back with backpressure. Failures are
//! answered with `Client Error` / `Server Error` responses, [`Server::close`] shuts down
//! gracefully.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use micro_bridge::engine::Engine;
//! use micro_bridge::protocol::{BoxError, Request, Response};
//! use micro_server::{Server, ServerConfig, make_handler};
//!
//! async fn hello(request: Request) -> Result<Response, BoxError> {
//!     Ok(Response::new(format!("hello from {}", request.path())))
//! }
//!
//! async fn run<E: Engine>(engine: Arc<E>) -> Result<(), BoxError> {
//!     micro_server::init_tracing(tracing::Level::INFO)?;
//!
//!     let server = Server::builder()
//!         .engine(engine)
//!         .config(ServerConfig::default().with_port(8080))
//!         .handler(make_handler(hello))
//!         .build()?;
//!
//!     server.listen()?;
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod handler;
mod server;
mod shutdown;

pub use config::ErrorVerbosity;
pub use config::ServerConfig;
pub use error::ServerError;
pub use error::StatusError;
pub use handler::Handler;
pub use handler::HandlerFn;
pub use handler::make_handler;
pub use server::Server;
pub use server::ServerBuilder;
pub use shutdown::ShutdownHook;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs a global `fmt` subscriber logging at `level` and above.
pub fn init_tracing(level: Level) -> Result<(), ServerError> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
