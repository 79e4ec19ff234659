use std::future::Future;

use async_trait::async_trait;
use micro_bridge::protocol::{BoxError, Request, Response};

/// Turns a request into a response.
///
/// An `Err` is answered with an error response, see [`StatusError`](crate::StatusError) to pick
/// its status.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: Request) -> Result<Response, BoxError>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, Resp, Err> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, Err>> + Send,
    Resp: Into<Response>,
    Err: Into<BoxError>,
{
    async fn call(&self, request: Request) -> Result<Response, BoxError> {
        (self.f)(request).await.map(Into::<Response>::into).map_err(Into::<BoxError>::into)
    }
}

pub fn make_handler<F, Fut, Resp, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, Err>> + Send,
    Resp: Into<Response>,
    Err: Into<BoxError>,
{
    HandlerFn { f }
}
