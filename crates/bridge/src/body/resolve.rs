//! Classification of a [`ResponseBody`] into what the write loop can send.
//!
//! Rules, in priority order:
//!
//! 1. `Empty` stays empty, headers are left alone
//! 2. `Deferred` is awaited once, then classified again; a deferred value resolving to another
//!    deferred value is not chained
//! 3. `Text` is sent as UTF-8
//! 4. `Json` is serialized and always forces `content-type: application/json`
//! 5. `Blob` is read to the end into an owned buffer
//! 6. `Binary` is sent verbatim
//! 7. `Stream` is passed through unmaterialized, framing becomes chunked
//! 8. `Unsupported` is a [`ResponseError::UnsupportedBody`]
//!
//! Buffered payloads always get an exact `content-length`, whatever the handler set. A present
//! body without `content-type` gets the configured default.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use tokio::io::AsyncReadExt;

use super::{BoxByteStream, ResponseBody};
use crate::protocol::ResponseError;

/// A body ready for the wire.
pub enum Payload {
    Empty,
    Buffer(Bytes),
    Stream(BoxByteStream),
}

impl Payload {
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Buffer(bytes) => Some(bytes.len()),
            Self::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(bytes).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub default_content_type: HeaderValue,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self { default_content_type: HeaderValue::from_static("text/plain; charset=utf-8") }
    }
}

static APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");

/// Resolves `body` and adjusts `headers` for it.
///
/// Everything that can fail does so here, before any byte reaches the engine. A stream is locked
/// during resolution, so a stream somebody else already took is reported as
/// [`ResponseError::BodyLocked`] instead of being written.
pub async fn resolve(body: ResponseBody, headers: &mut HeaderMap, options: &ResolveOptions) -> Result<Payload, ResponseError> {
    let body = match body {
        ResponseBody::Deferred(deferred) => deferred.await.map_err(ResponseError::deferred)?,
        body => body,
    };

    let payload = match body {
        ResponseBody::Empty => return Ok(Payload::Empty),
        ResponseBody::Deferred(_) => return Err(ResponseError::unsupported_body("deferred")),
        ResponseBody::Unsupported(type_name) => return Err(ResponseError::unsupported_body(type_name)),
        ResponseBody::Text(text) => Payload::Buffer(Bytes::from(text)),
        ResponseBody::Json(value) => {
            headers.insert(CONTENT_TYPE, APPLICATION_JSON.clone());
            Payload::Buffer(Bytes::from(serde_json::to_vec(&value)?))
        }
        ResponseBody::Blob(mut reader) => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.map_err(ResponseError::blob)?;
            Payload::Buffer(Bytes::from(buf))
        }
        ResponseBody::Binary(bytes) => Payload::Buffer(bytes),
        ResponseBody::Stream(stream) => Payload::Stream(stream.lock()?),
    };

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, options.default_content_type.clone());
    }

    if let Payload::Buffer(bytes) = &payload {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    }

    Ok(payload)
}
