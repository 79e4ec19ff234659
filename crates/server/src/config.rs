use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use http::HeaderValue;
use http::uri::Scheme;
use micro_bridge::body::{DEFAULT_HIGH_WATER_MARK, ResolveOptions};
use micro_bridge::protocol::RequestOptions;
use serde::Deserialize;

use crate::ServerError;

/// How much of an error ends up in the body of an error response.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorVerbosity {
    /// only `Client Error` / `Server Error`
    Hidden,
    /// the error's message is appended
    #[default]
    Message,
    /// the message and every source of the error are appended
    Chain,
}

/// Server settings, every field has a default so partial documents deserialize.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// 0 lets the engine pick a port
    pub port: u16,
    /// host used in request urls when the client sends no `host` header
    pub default_host: Option<String>,
    /// requests are reported with the `https` scheme
    pub ssl: bool,
    /// milliseconds to wait for in-flight connections on close
    pub drain_timeout: u64,
    pub error_verbosity: ErrorVerbosity,
    /// queued request body chunks before the engine is paused
    pub body_high_water_mark: usize,
    /// content type of response bodies that do not set one
    pub default_content_type: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            port: 0,
            default_host: None,
            ssl: false,
            drain_timeout: 10_000,
            error_verbosity: ErrorVerbosity::default(),
            body_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            default_content_type: mime::TEXT_PLAIN_UTF_8.to_string(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_error_verbosity(mut self, verbosity: ErrorVerbosity) -> Self {
        self.error_verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_body_high_water_mark(mut self, chunks: usize) -> Self {
        self.body_high_water_mark = chunks;
        self
    }

    #[must_use]
    pub fn with_default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout)
    }

    pub fn scheme(&self) -> Scheme {
        if self.ssl { Scheme::HTTPS } else { Scheme::HTTP }
    }

    pub(crate) fn request_options(&self) -> RequestOptions {
        RequestOptions {
            scheme: self.scheme(),
            default_host: self.default_host.clone(),
            high_water_mark: self.body_high_water_mark,
        }
    }

    pub(crate) fn resolve_options(&self) -> Result<ResolveOptions, ServerError> {
        let default_content_type = HeaderValue::from_str(&self.default_content_type)
            .map_err(|e| ServerError::invalid_config(format!("default_content_type: {e}")))?;
        Ok(ResolveOptions { default_content_type })
    }

    pub(crate) fn validate(&self) -> Result<(), ServerError> {
        if self.body_high_water_mark == 0 {
            return Err(ServerError::invalid_config("body_high_water_mark must be at least 1"));
        }
        self.resolve_options().map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind.to_string(), "::");
        assert_eq!(config.port, 0);
        assert_eq!(config.drain_timeout(), Duration::from_secs(10));
        assert_eq!(config.error_verbosity, ErrorVerbosity::Message);
        assert_eq!(config.body_high_water_mark, 32);
        assert_eq!(config.scheme(), Scheme::HTTP);
        config.validate().unwrap();
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{ "bind": "127.0.0.1", "port": 8080, "ssl": true, "drain_timeout": 500, "error_verbosity": "chain" }"#,
        )
        .unwrap();

        assert_eq!(config.bind.to_string(), "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.scheme(), Scheme::HTTPS);
        assert_eq!(config.drain_timeout(), Duration::from_millis(500));
        assert_eq!(config.error_verbosity, ErrorVerbosity::Chain);
        assert_eq!(config.default_content_type, "text/plain; charset=utf-8");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = ServerConfig::default().with_body_high_water_mark(0);
        assert!(matches!(config.validate(), Err(ServerError::InvalidConfig { .. })));

        let config = ServerConfig::default().with_default_content_type("text/plain\n");
        assert!(matches!(config.validate(), Err(ServerError::InvalidConfig { .. })));
    }

    #[test]
    fn options_follow_config() {
        let config = ServerConfig::default().with_ssl(true).with_default_host("example.org").with_body_high_water_mark(4);
        let options = config.request_options();
        assert_eq!(options.scheme, Scheme::HTTPS);
        assert_eq!(options.default_host.as_deref(), Some("example.org"));
        assert_eq!(options.high_water_mark, 4);
    }
}
