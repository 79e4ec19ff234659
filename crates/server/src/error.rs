use http::StatusCode;
use micro_bridge::protocol::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("handler must be set")]
    MissingHandler,

    #[error("engine must be set")]
    MissingEngine,

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("server already listening")]
    AlreadyListening,

    #[error("server failed to listen: {source}")]
    Listen {
        #[from]
        source: EngineError,
    },

    #[error("no tokio runtime to run requests on: {source}")]
    Runtime {
        #[from]
        source: tokio::runtime::TryCurrentError,
    },

    #[error("failed to install tracing subscriber: {source}")]
    Tracing {
        #[from]
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

impl ServerError {
    pub fn invalid_config<S: ToString>(str: S) -> Self {
        Self::InvalidConfig { reason: str.to_string() }
    }
}

/// Handler error that picks the status of its error response.
///
/// Any other handler error is answered with `500`.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StatusError {
    status: StatusCode,
    message: String,
}

impl StatusError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
