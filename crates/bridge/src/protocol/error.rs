use std::error::Error;
use std::io;

use thiserror::Error;

/// Error type used for anything a handler or a user supplied body produces.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors caused by the client side of an exchange.
///
/// Construction errors are answered with a 4xx response, body errors are surfaced to the
/// handler that tried to read the body.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("method not supported: {method}")]
    UnsupportedMethod { method: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid url: {reason}")]
    InvalidUrl { reason: String },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("request body has been consumed")]
    BodyUsed,

    #[error("request aborted")]
    Aborted,
}

impl RequestError {
    pub fn unsupported_method<S: ToString>(method: S) -> Self {
        Self::UnsupportedMethod { method: method.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_url<S: ToString>(str: S) -> Self {
        Self::InvalidUrl { reason: str.to_string() }
    }

    pub fn invalid_query<S: ToString>(str: S) -> Self {
        Self::InvalidQuery { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }
}

/// Errors raised while turning a handler's response into bytes on the wire.
///
/// These are server side faults and never retried.
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("response body type not supported: {type_name}")]
    UnsupportedBody { type_name: &'static str },

    #[error("response body stream locked")]
    BodyLocked,

    #[error("response body could not be serialized: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("deferred response body failed: {source}")]
    Deferred { source: BoxError },

    #[error("response body blob could not be read: {source}")]
    Blob { source: io::Error },

    #[error("response body stream failed: {source}")]
    Stream { source: BoxError },

    #[error("a response is already being written on this connection")]
    ConcurrentWrite,

    #[error("response status out of range: {status}")]
    InvalidStatus { status: u16 },
}

impl ResponseError {
    pub fn unsupported_body(type_name: &'static str) -> Self {
        Self::UnsupportedBody { type_name }
    }

    pub fn deferred<E: Into<BoxError>>(e: E) -> Self {
        Self::Deferred { source: e.into() }
    }

    pub fn blob<E: Into<io::Error>>(e: E) -> Self {
        Self::Blob { source: e.into() }
    }

    pub fn stream<E: Into<BoxError>>(e: E) -> Self {
        Self::Stream { source: e.into() }
    }

    /// Returns true when status and headers already reached the engine, so the error can no
    /// longer be turned into an error response.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("connection already closed")]
    Closed,

    #[error("engine refused: {reason}")]
    Refused { reason: String },
}

impl EngineError {
    pub fn refused<S: ToString>(str: S) -> Self {
        Self::Refused { reason: str.to_string() }
    }
}
