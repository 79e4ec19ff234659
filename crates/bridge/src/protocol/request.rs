//! The request value handed to handlers.
//!
//! A [`Request`] is built from the raw [`RequestMeta`] the engine captured on accept. Its body is
//! bridged lazily: the engine keeps request chunks until [`Request::body`] is first called, which
//! installs the inbound bridge and memoizes it for every later access.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HOST, HeaderName, HeaderValue};
use http::uri::Scheme;
use http::{HeaderMap, Method, Uri};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::body::{DEFAULT_HIGH_WATER_MARK, RequestBody};
use crate::connection::{Connection, ConnectionId};
use crate::engine::RequestMeta;
use crate::ensure;
use crate::protocol::RequestError;

const FALLBACK_HOST: &str = "localhost";

/// Settings applied while building requests.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub scheme: Scheme,
    /// used when the request carries no `host` header
    pub default_host: Option<String>,
    pub high_water_mark: usize,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self { scheme: Scheme::HTTP, default_host: None, high_water_mark: DEFAULT_HIGH_WATER_MARK }
    }
}

/// How a method treats its request body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum BodyClass {
    Bodyless,
    Streaming,
}

fn body_class(method: &Method) -> Result<BodyClass, RequestError> {
    match *method {
        // TRACE goes through the bodyless path but keeps its own method
        Method::GET | Method::HEAD | Method::TRACE => Ok(BodyClass::Bodyless),
        Method::OPTIONS | Method::PUT | Method::DELETE | Method::POST | Method::PATCH | Method::CONNECT => {
            Ok(BodyClass::Streaming)
        }
        _ => Err(RequestError::unsupported_method(method)),
    }
}

pub struct Request {
    method: Method,
    url: Uri,
    path: String,
    query: String,
    headers: HeaderMap,
    connection: Arc<Connection>,
    body_class: BodyClass,
    high_water_mark: usize,
    body: OnceCell<Option<RequestBody>>,
}

impl Request {
    /// Builds a request for `connection`, failing with a client error on malformed input.
    pub fn from_meta(meta: RequestMeta, connection: Arc<Connection>, options: &RequestOptions) -> Result<Self, RequestError> {
        let Ok(method) = Method::from_bytes(meta.method.to_ascii_uppercase().as_bytes()) else {
            return Err(RequestError::unsupported_method(&meta.method));
        };
        let body_class = body_class(&method)?;

        let mut headers = HeaderMap::with_capacity(meta.headers.len());
        for (name, value) in &meta.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(RequestError::invalid_header)?;
            let value = HeaderValue::from_str(value).map_err(RequestError::invalid_header)?;
            headers.append(name, value);
        }

        ensure!(meta.path.starts_with('/'), RequestError::invalid_url(format!("path must be absolute: {}", meta.path)));

        let host = headers
            .get(HOST)
            .and_then(|host| host.to_str().ok())
            .filter(|host| !host.is_empty())
            .or(options.default_host.as_deref())
            .unwrap_or(FALLBACK_HOST);

        let url = if meta.query.is_empty() {
            format!("{}://{}{}", options.scheme, host, meta.path)
        } else {
            format!("{}://{}{}?{}", options.scheme, host, meta.path, meta.query)
        };
        let url = url.parse::<Uri>().map_err(RequestError::invalid_url)?;

        Ok(Self {
            method,
            url,
            path: meta.path,
            query: meta.query,
            headers,
            connection,
            body_class,
            high_water_mark: options.high_water_mark,
            body: OnceCell::new(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request url, `scheme://host/path?query`.
    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string without the leading `?`, empty when absent.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Cancelled when the client goes away.
    pub fn signal(&self) -> &CancellationToken {
        self.connection.signal()
    }

    pub fn is_aborted(&self) -> bool {
        self.connection.is_aborted()
    }

    /// The streaming body, `None` for bodyless methods.
    ///
    /// The first call installs the inbound bridge, every later call returns a handle to the same
    /// body.
    pub fn body(&self) -> Option<RequestBody> {
        self.body
            .get_or_init(|| match self.body_class {
                BodyClass::Streaming => Some(RequestBody::bridge(&self.connection, self.high_water_mark)),
                BodyClass::Bodyless => None,
            })
            .clone()
    }

    /// Reads the whole body, empty for bodyless methods.
    pub async fn bytes(&self) -> Result<Bytes, RequestError> {
        match self.body() {
            Some(body) => body.collect_bytes().await,
            None => Ok(Bytes::new()),
        }
    }

    pub async fn text(&self) -> Result<String, RequestError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.into()).map_err(RequestError::invalid_body)
    }

    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(RequestError::invalid_body)
    }

    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_urlencoded::from_str(&self.query).map_err(RequestError::invalid_query)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("connection", &self.connection.id())
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockSocket;
    use crate::engine::Socket;
    use serde::Deserialize;

    fn build(meta: RequestMeta) -> Result<(Arc<MockSocket>, Request), RequestError> {
        build_with(meta, &RequestOptions::default())
    }

    fn build_with(meta: RequestMeta, options: &RequestOptions) -> Result<(Arc<MockSocket>, Request), RequestError> {
        let socket = MockSocket::new();
        let connection = Connection::new(Arc::clone(&socket) as Arc<dyn Socket>);
        Request::from_meta(meta, connection, options).map(|request| (socket, request))
    }

    #[test]
    fn url_is_built_from_host_header() {
        let meta = RequestMeta::new("get", "/items").query("page=2").header("Host", "example.com:8080");
        let (_, request) = build(meta).unwrap();

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.url().to_string(), "http://example.com:8080/items?page=2");
        assert_eq!(request.path(), "/items");
        assert_eq!(request.query(), "page=2");
        assert!(request.body().is_none());
    }

    #[test]
    fn host_falls_back_to_default_then_localhost() {
        let options = RequestOptions {
            scheme: Scheme::HTTPS,
            default_host: Some("api.internal".to_string()),
            ..RequestOptions::default()
        };
        let (_, request) = build_with(RequestMeta::new("GET", "/"), &options).unwrap();
        assert_eq!(request.url().to_string(), "https://api.internal/");

        let (_, request) = build(RequestMeta::new("GET", "/health")).unwrap();
        assert_eq!(request.url().to_string(), "http://localhost/health");
    }

    #[test]
    fn trace_reports_its_own_method_without_body() {
        let (_, request) = build(RequestMeta::new("TRACE", "/")).unwrap();
        assert_eq!(request.method(), &Method::TRACE);
        assert!(request.body().is_none());
    }

    #[test]
    fn unknown_methods_are_client_errors() {
        let err = build(RequestMeta::new("BREW", "/pot")).unwrap_err();
        assert!(matches!(err, RequestError::UnsupportedMethod { method } if method == "BREW"));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let err = build(RequestMeta::new("GET", "/").header("bad header", "x")).unwrap_err();
        assert!(matches!(err, RequestError::InvalidHeader { .. }));

        let err = build(RequestMeta::new("GET", "relative")).unwrap_err();
        assert!(matches!(err, RequestError::InvalidUrl { .. }));
    }

    #[test]
    fn repeated_headers_are_kept() {
        let meta = RequestMeta::new("GET", "/").header("accept", "text/html").header("Accept", "*/*");
        let (_, request) = build(meta).unwrap();
        assert_eq!(request.headers().get_all("accept").iter().count(), 2);
    }

    #[tokio::test]
    async fn body_is_memoized() {
        let (socket, request) = build(RequestMeta::new("POST", "/upload")).unwrap();
        socket.push_data(b"payload", true);

        let first = request.body().unwrap();
        let second = request.body().unwrap();
        assert_eq!(first, second);

        assert_eq!(request.text().await.unwrap(), "payload");
        assert!(matches!(request.bytes().await, Err(RequestError::BodyUsed)));
    }

    #[tokio::test]
    async fn json_and_query_are_decoded() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            name: String,
        }

        #[derive(Debug, Deserialize, PartialEq)]
        struct Page {
            page: u32,
        }

        let (socket, request) = build(RequestMeta::new("PUT", "/items").query("page=3")).unwrap();
        socket.push_data(br#"{"name":"lamp"}"#, true);

        assert_eq!(request.json::<Item>().await.unwrap(), Item { name: "lamp".to_string() });
        assert_eq!(request.query_as::<Page>().unwrap(), Page { page: 3 });
        assert!(matches!(request.query_as::<Item>(), Err(RequestError::InvalidQuery { .. })));
    }

    #[tokio::test]
    async fn bodyless_request_reads_empty() {
        let (_, request) = build(RequestMeta::new("HEAD", "/")).unwrap();
        assert!(request.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn abort_is_visible_on_request() {
        let (socket, request) = build(RequestMeta::new("POST", "/")).unwrap();
        let body = request.body().unwrap();

        request.connection().mark_aborted();
        socket.push_data(b"late", true);

        assert!(request.is_aborted());
        assert!(request.signal().is_cancelled());
        assert!(matches!(body.collect_bytes().await, Err(RequestError::Aborted)));
    }
}
