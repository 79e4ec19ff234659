use std::fmt::{Debug, Formatter};
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use micro_bridge::protocol::BoxError;

use crate::Server;

type HookFn = Box<dyn FnOnce(Server) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Work to finish before connections are drained on [`Server::close`].
pub enum ShutdownHook {
    /// called with the closing server
    Callback(HookFn),
    /// an operation that is already running
    Pending(BoxFuture<'static, Result<(), BoxError>>),
}

impl ShutdownHook {
    pub fn callback<F, Fut, E>(f: F) -> Self
    where
        F: FnOnce(Server) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Callback(Box::new(move |server| f(server).map(|result| result.map_err(Into::<BoxError>::into)).boxed()))
    }

    pub fn pending<Fut, E>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Pending(future.map(|result| result.map_err(Into::<BoxError>::into)).boxed())
    }

    pub(crate) async fn run(self, server: Server) -> Result<(), BoxError> {
        match self {
            Self::Callback(f) => f(server).await,
            Self::Pending(future) => future.await,
        }
    }
}

impl Debug for ShutdownHook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("ShutdownHook::Callback"),
            Self::Pending(_) => f.write_str("ShutdownHook::Pending"),
        }
    }
}
