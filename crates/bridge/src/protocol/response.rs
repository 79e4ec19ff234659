//! The response value a handler produces.
//!
//! A [`Response`] holds its status, headers and body directly, the body is classified only
//! when the response is written (see [`crate::body::resolve`]).

use std::borrow::Cow;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Serialize;

use crate::body::{ByteStream, ResponseBody};
use crate::protocol::ResponseError;

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    status_text: Option<Cow<'static, str>>,
    headers: HeaderMap,
    body: ResponseBody,
}

impl Default for Response {
    fn default() -> Self {
        Self::empty()
    }
}

impl Response {
    pub fn new(body: impl Into<ResponseBody>) -> Self {
        Self { status: StatusCode::OK, status_text: None, headers: HeaderMap::new(), body: body.into() }
    }

    pub fn empty() -> Self {
        Self::new(ResponseBody::Empty)
    }

    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::new(ResponseBody::Text(text.into())).with_status(status)
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, ResponseError> {
        Ok(Self::new(ResponseBody::json(value)?))
    }

    pub fn stream(stream: ByteStream) -> Self {
        Self::new(ResponseBody::Stream(stream))
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_status_text(mut self, text: impl Into<Cow<'static, str>>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Sets a header, replacing previous values for the same name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_mut(&mut self) -> &mut StatusCode {
        &mut self.status
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Status line as written to the engine: explicit text, then the canonical reason, then the
    /// bare code.
    pub fn status_line(&self) -> String {
        match (self.status_text.as_deref(), self.status.canonical_reason()) {
            (Some(text), _) if !text.is_empty() => format!("{} {}", self.status.as_u16(), text),
            (_, Some(reason)) => format!("{} {}", self.status.as_u16(), reason),
            _ => self.status.as_u16().to_string(),
        }
    }

    pub fn into_parts(self) -> (Parts, ResponseBody) {
        (Parts { status_line: self.status_line(), headers: self.headers }, self.body)
    }
}

/// Status line and headers of a response whose body was taken out.
#[derive(Debug)]
pub struct Parts {
    pub status_line: String,
    pub headers: HeaderMap,
}

impl From<http::Response<ResponseBody>> for Response {
    fn from(response: http::Response<ResponseBody>) -> Self {
        let (parts, body) = response.into_parts();
        Self { status: parts.status, status_text: None, headers: parts.headers, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn status_line_prefers_explicit_text() {
        let response = Response::empty().with_status(StatusCode::NOT_FOUND);
        assert_eq!(response.status_line(), "404 Not Found");

        let response = response.with_status_text("Gone Fishing");
        assert_eq!(response.status_line(), "404 Gone Fishing");

        let unknown = Response::empty().with_status(StatusCode::from_u16(599).unwrap());
        assert_eq!(unknown.status_line(), "599");
    }

    #[test]
    fn headers_are_last_write_wins() {
        let response = Response::new("hi")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/css"));

        assert_eq!(response.headers().get_all(CONTENT_TYPE).iter().count(), 1);
        assert_eq!(response.headers()["content-type"], "text/css");
        assert!(response.is_ok());
    }

    #[test]
    fn converts_from_http_response() {
        let response: Response =
            http::Response::builder().status(StatusCode::CREATED).body(ResponseBody::from("made")).unwrap().into();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(matches!(response.body(), ResponseBody::Text(text) if text == "made"));
    }
}
