//! Harness configuration.
//!
//! Provides a type-safe interface for configuring a harness run: endpoint,
//! protocol, TLS policy, HTTP method, client count, and pool admission
//! behavior.
//!
//! # Example
//!
//! ```ignore
//! use wireprobe::{HarnessConfig, Protocol};
//!
//! let config = HarnessConfig::new("wss://localhost:8080/", Protocol::Duplex)?
//!     .with_clients(10)
//!     .with_stagger_delay_ms(100);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default Content-Type header for request-response mode.
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

// ============================================================================
// Protocol
// ============================================================================

/// Protocol adapter selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// One HTTP request per send, no persistent connection state.
    RequestResponse,
    /// Persistent raw WebSocket stream.
    Duplex,
    /// Socket.IO-style multiplexed event stream over WebSocket.
    Multiplex,
}

impl Protocol {
    /// Returns the canonical name used in configuration and output.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestResponse => "request-response",
            Self::Duplex => "duplex",
            Self::Multiplex => "multiplex",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request-response" => Ok(Self::RequestResponse),
            "duplex" => Ok(Self::Duplex),
            "multiplex" => Ok(Self::Multiplex),
            other => Err(Error::config(format!(
                "Unknown protocol \"{other}\" (expected request-response, duplex, or multiplex)"
            ))),
        }
    }
}

// ============================================================================
// HttpMethod
// ============================================================================

/// HTTP verb for request-response mode.
///
/// Only the verbs the harness supports are representable; parsing any other
/// string fails with [`Error::UnsupportedMethod`] before a request is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    /// GET request.
    #[default]
    Get,
    /// POST request with form-encoded body.
    Post,
    /// PUT request with form-encoded body.
    Put,
    /// DELETE request.
    Delete,
}

impl HttpMethod {
    /// Returns the uppercase verb name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Returns `true` if this verb carries a request body.
    #[inline]
    #[must_use]
    pub const fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::unsupported_method(other)),
        }
    }
}

// ============================================================================
// AdmissionPolicy
// ============================================================================

/// How the client pool admits sessions when fanning out.
///
/// The stagger delay alone cannot tell an overloaded target apart from a slow
/// one, so the admission behavior is an explicit choice rather than an
/// inferred one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Spawn every session up front (staggered); each connects independently
    /// and a failed connect terminates only that session.
    #[default]
    FailFast,
    /// Admit the next session only after the previous one has resolved its
    /// connect attempt, queueing the fan-out behind the target's accept rate.
    Sequential,
}

impl AdmissionPolicy {
    /// Returns the canonical policy name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdmissionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" => Ok(Self::FailFast),
            "sequential" => Ok(Self::Sequential),
            other => Err(Error::config(format!(
                "Unknown admission policy \"{other}\" (expected fail-fast or sequential)"
            ))),
        }
    }
}

// ============================================================================
// HarnessConfig
// ============================================================================

/// Complete configuration for a harness run.
///
/// Immutable once sessions start; the pool clones what each session needs.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Target endpoint URL.
    pub endpoint_url: Url,

    /// Selected protocol adapter.
    pub protocol: Protocol,

    /// Verify TLS certificates. Defaults to `true`; opting out is an
    /// explicit per-run decision, never a blanket suppression.
    pub verify_tls: bool,

    /// Number of independent sessions to run.
    pub client_count: usize,

    /// Delay between admitting consecutive sessions.
    pub stagger_delay: Duration,

    /// HTTP verb (request-response only).
    pub http_method: HttpMethod,

    /// Initial form-encoded body (request-response only); sent once at
    /// startup when present.
    pub body: Option<String>,

    /// Request headers (request-response only).
    pub headers: Vec<(String, String)>,

    /// Timeout for the connect step of each session.
    pub connect_timeout: Duration,

    /// Pool admission behavior.
    pub admission: AdmissionPolicy,
}

// ============================================================================
// Constructors
// ============================================================================

impl HarnessConfig {
    /// Creates a configuration for the given endpoint and protocol with
    /// default settings.
    ///
    /// Request-response mode gets a `Content-Type:
    /// application/x-www-form-urlencoded` header by default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the endpoint URL does not parse.
    pub fn new(endpoint_url: &str, protocol: Protocol) -> Result<Self> {
        let endpoint_url = Url::parse(endpoint_url)?;

        let headers = if protocol == Protocol::RequestResponse {
            vec![("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string())]
        } else {
            Vec::new()
        };

        Ok(Self {
            endpoint_url,
            protocol,
            verify_tls: true,
            client_count: 1,
            stagger_delay: Duration::ZERO,
            http_method: HttpMethod::default(),
            body: None,
            headers,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            admission: AdmissionPolicy::default(),
        })
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl HarnessConfig {
    /// Disables TLS certificate verification for this run.
    #[inline]
    #[must_use]
    pub fn with_insecure_tls(mut self) -> Self {
        self.verify_tls = false;
        self
    }

    /// Sets the number of independent sessions.
    #[inline]
    #[must_use]
    pub fn with_clients(mut self, count: usize) -> Self {
        self.client_count = count.max(1);
        self
    }

    /// Sets the delay between admitting consecutive sessions.
    #[inline]
    #[must_use]
    pub fn with_stagger_delay_ms(mut self, millis: u64) -> Self {
        self.stagger_delay = Duration::from_millis(millis);
        self
    }

    /// Sets the HTTP verb for request-response mode.
    #[inline]
    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.http_method = method;
        self
    }

    /// Sets the initial form-encoded body for request-response mode.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Adds a request header, replacing an existing header of the same name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the pool admission policy.
    #[inline]
    #[must_use]
    pub fn with_admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config =
            HarnessConfig::new("https://localhost:8080/", Protocol::RequestResponse).unwrap();

        assert!(config.verify_tls);
        assert_eq!(config.client_count, 1);
        assert_eq!(config.stagger_delay, Duration::ZERO);
        assert_eq!(config.http_method, HttpMethod::Get);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.admission, AdmissionPolicy::FailFast);
        assert_eq!(
            config.headers,
            vec![("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string())]
        );
    }

    #[test]
    fn test_no_default_headers_for_streams() {
        let config = HarnessConfig::new("ws://localhost:8080/", Protocol::Duplex).unwrap();
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(
            "request-response".parse::<Protocol>().unwrap(),
            Protocol::RequestResponse
        );
        assert_eq!("Duplex".parse::<Protocol>().unwrap(), Protocol::Duplex);
        assert_eq!(
            " multiplex ".parse::<Protocol>().unwrap(),
            Protocol::Multiplex
        );
        assert!("socketio".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_method_parse_supported() {
        assert_eq!("GET".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!(" Put ".parse::<HttpMethod>().unwrap(), HttpMethod::Put);
        assert_eq!("delete".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
    }

    #[test]
    fn test_method_parse_unsupported() {
        for bad in ["PATCH", "HEAD", "OPTIONS", "TRACE", ""] {
            let err = bad.parse::<HttpMethod>().unwrap_err();
            assert!(
                matches!(err, Error::UnsupportedMethod { .. }),
                "expected UnsupportedMethod for {bad:?}"
            );
        }
    }

    #[test]
    fn test_method_has_body() {
        assert!(!HttpMethod::Get.has_body());
        assert!(HttpMethod::Post.has_body());
        assert!(HttpMethod::Put.has_body());
        assert!(!HttpMethod::Delete.has_body());
    }

    #[test]
    fn test_admission_parse() {
        assert_eq!(
            "fail-fast".parse::<AdmissionPolicy>().unwrap(),
            AdmissionPolicy::FailFast
        );
        assert_eq!(
            "sequential".parse::<AdmissionPolicy>().unwrap(),
            AdmissionPolicy::Sequential
        );
        assert!("eager".parse::<AdmissionPolicy>().is_err());
    }

    #[test]
    fn test_with_header_replaces() {
        let config = HarnessConfig::new("http://localhost/", Protocol::RequestResponse)
            .unwrap()
            .with_header("content-type", "text/plain");

        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].1, "text/plain");
    }

    #[test]
    fn test_clients_minimum_one() {
        let config = HarnessConfig::new("ws://localhost/", Protocol::Duplex)
            .unwrap()
            .with_clients(0);
        assert_eq!(config.client_count, 1);
    }
}
