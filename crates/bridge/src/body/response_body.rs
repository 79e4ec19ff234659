use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use http_body_util::BodyExt;
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::protocol::{BoxError, ResponseError};

pub type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

pub type DeferredBody = Pin<Box<dyn Future<Output = Result<ResponseBody, BoxError>> + Send>>;

pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Every shape a handler may hand back as a response body.
///
/// Classification into wire bytes happens in [`resolve`](super::resolve), the write loop only
/// ever sees the resolved form.
pub enum ResponseBody {
    /// no body at all, the response is ended without one
    Empty,
    /// a body that is not available yet, unwrapped exactly once
    Deferred(DeferredBody),
    Text(String),
    /// structured data, serialized as JSON
    Json(serde_json::Value),
    /// a readable handle, read fully before writing
    Blob(BlobReader),
    /// raw bytes sent verbatim, numeric vectors are copied into their native-endian image
    Binary(Bytes),
    Stream(ByteStream),
    /// a value the bridge does not know how to send, carries its type name
    Unsupported(&'static str),
}

impl ResponseBody {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ResponseError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn deferred<F, B, E>(future: F) -> Self
    where
        F: Future<Output = Result<B, E>> + Send + 'static,
        B: Into<ResponseBody>,
        E: Into<BoxError> + 'static,
    {
        Self::Deferred(Box::pin(async move { future.await.map(Into::<ResponseBody>::into).map_err(Into::<BoxError>::into) }))
    }

    pub fn blob<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::Blob(Box::pin(reader))
    }

    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Stream(ByteStream::new(stream))
    }

    /// Adapts any `http_body::Body` into a streaming body, trailers are dropped.
    pub fn from_body<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + 'static,
    {
        Self::stream(body.into_data_stream())
    }

    pub fn unsupported<T: ?Sized>() -> Self {
        Self::Unsupported(std::any::type_name::<T>())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Deferred(_) => "deferred",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Blob(_) => "blob",
            Self::Binary(_) => "binary",
            Self::Stream(_) => "stream",
            Self::Unsupported(name) => *name,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl Debug for ResponseBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Binary(bytes) => f.debug_tuple("Binary").field(bytes).finish(),
            Self::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl<T: Into<ResponseBody>> From<Option<T>> for ResponseBody {
    fn from(option: Option<T>) -> Self {
        option.map_or(Self::Empty, Into::into)
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<BytesMut> for ResponseBody {
    fn from(bytes: BytesMut) -> Self {
        Self::Binary(bytes.freeze())
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes.into())
    }
}

impl From<&'static [u8]> for ResponseBody {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Binary(Bytes::from_static(bytes))
    }
}

impl From<serde_json::Value> for ResponseBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<ByteStream> for ResponseBody {
    fn from(stream: ByteStream) -> Self {
        Self::Stream(stream)
    }
}

macro_rules! json_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ResponseBody {
                fn from(value: $ty) -> Self {
                    Self::Json(serde_json::Value::from(value))
                }
            }
        )*
    };
}

json_scalar!(bool, i32, i64, u32, u64, f64);

// numeric arrays are copied element by element into their native-endian memory image
macro_rules! numeric_array {
    ($($ty:ty),*) => {
        $(
            impl From<Vec<$ty>> for ResponseBody {
                fn from(values: Vec<$ty>) -> Self {
                    let mut bytes = BytesMut::with_capacity(values.len() * size_of::<$ty>());
                    for value in values {
                        bytes.extend_from_slice(&value.to_ne_bytes());
                    }
                    Self::Binary(bytes.freeze())
                }
            }
        )*
    };
}

numeric_array!(i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// A single-pass byte stream that can be handed around before somebody reads it.
///
/// Cloning shares the same underlying stream. The first [`lock`](Self::lock) takes it, every
/// later attempt fails with [`ResponseError::BodyLocked`].
#[derive(Clone)]
pub struct ByteStream {
    inner: Arc<Mutex<Option<BoxByteStream>>>,
}

impl ByteStream {
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self { inner: Arc::new(Mutex::new(Some(Box::pin(stream.map_err(Into::<BoxError>::into))))) }
    }

    pub fn lock(&self) -> Result<BoxByteStream, ResponseError> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).take().ok_or(ResponseError::BodyLocked)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

impl Debug for ByteStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream").field("locked", &self.is_locked()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use http_body_util::Full;

    #[test]
    fn conversions_pick_the_expected_variant() {
        assert!(ResponseBody::from(()).is_empty());
        assert!(ResponseBody::from(None::<String>).is_empty());
        assert_eq!(ResponseBody::from("hi").kind(), "text");
        assert_eq!(ResponseBody::from(vec![1u8, 2]).kind(), "binary");
        assert_eq!(ResponseBody::from(true).kind(), "json");
        assert_eq!(ResponseBody::from(serde_json::json!({"a": 1})).kind(), "json");
        assert_eq!(ResponseBody::unsupported::<std::fs::File>().kind(), std::any::type_name::<std::fs::File>());
    }

    #[test]
    fn numeric_arrays_keep_their_memory_image() {
        let ResponseBody::Binary(bytes) = ResponseBody::from(vec![1u16, 2u16]) else {
            panic!("expected binary body");
        };
        let mut expected = Vec::new();
        expected.extend_from_slice(&1u16.to_ne_bytes());
        expected.extend_from_slice(&2u16.to_ne_bytes());
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn byte_stream_locks_once() {
        let stream = ByteStream::new(futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"a"))]));
        let shared = stream.clone();

        assert!(!shared.is_locked());
        assert!(stream.lock().is_ok());
        assert!(shared.is_locked());
        assert!(matches!(shared.lock(), Err(ResponseError::BodyLocked)));
    }

    #[tokio::test]
    async fn http_body_becomes_stream() {
        let body = ResponseBody::from_body(Full::new(Bytes::from_static(b"full body")));
        let ResponseBody::Stream(stream) = body else {
            panic!("expected stream body");
        };
        let mut reader = stream.lock().unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap(), Bytes::from_static(b"full body"));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn deferred_maps_value_and_error() {
        let ResponseBody::Deferred(ok) = ResponseBody::deferred(async { Ok::<_, std::io::Error>("later") }) else {
            panic!("expected deferred body");
        };
        assert_eq!(ok.await.unwrap().kind(), "text");

        let ResponseBody::Deferred(err) = ResponseBody::deferred(async { Err::<String, _>(std::io::Error::other("nope")) })
        else {
            panic!("expected deferred body");
        };
        assert_eq!(err.await.unwrap_err().to_string(), "nope");
    }
}
