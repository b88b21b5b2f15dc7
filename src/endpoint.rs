//! Endpoint addressing.
//!
//! An [`Endpoint`] couples a parsed URL with the protocol selector and is
//! immutable once a session starts. Scheme validation happens here, before
//! any connect attempt.
//!
//! Multiplex endpoints accept the plain HTTP form their servers advertise
//! (`http://host:port`) and rewrite it to the Engine.IO websocket URL the
//! transport actually dials
//! (`ws://host:port/socket.io/?EIO=4&transport=websocket`).

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::config::Protocol;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Engine.IO handshake path for multiplex endpoints.
const ENGINE_IO_PATH: &str = "/socket.io/";

/// Engine.IO protocol version and transport query string.
const ENGINE_IO_QUERY: &str = "EIO=4&transport=websocket";

// ============================================================================
// Endpoint
// ============================================================================

/// A validated connection target: URL plus protocol selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    protocol: Protocol,
}

impl Endpoint {
    /// Validates the URL against the protocol and builds the endpoint.
    ///
    /// Accepted schemes:
    ///
    /// | Protocol | Schemes |
    /// |----------|---------|
    /// | request-response | `http`, `https` |
    /// | duplex | `ws`, `wss` |
    /// | multiplex | `http`, `https`, `ws`, `wss` (rewritten to `ws`/`wss`) |
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedScheme`] for any other scheme.
    pub fn new(url: Url, protocol: Protocol) -> Result<Self> {
        let scheme = url.scheme();

        let url = match protocol {
            Protocol::RequestResponse => match scheme {
                "http" | "https" => url,
                other => return Err(Error::unsupported_scheme(other, protocol.as_str())),
            },
            Protocol::Duplex => match scheme {
                "ws" | "wss" => url,
                other => return Err(Error::unsupported_scheme(other, protocol.as_str())),
            },
            Protocol::Multiplex => match scheme {
                "http" | "https" | "ws" | "wss" => rewrite_engine_io(url)?,
                other => return Err(Error::unsupported_scheme(other, protocol.as_str())),
            },
        };

        Ok(Self { url, protocol })
    }

    /// Returns the URL the transport will dial.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the protocol selector.
    #[inline]
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns a request URL with `suffix` appended to the endpoint path.
    ///
    /// Used by request-response mode where an operator line addresses a
    /// sub-path of the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the joined string does not parse.
    pub fn join_path(&self, suffix: &str) -> Result<Url> {
        let base = self.url.as_str().trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{suffix}"))?)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.protocol)
    }
}

// ============================================================================
// Engine.IO Rewrite
// ============================================================================

/// Rewrites a multiplex endpoint URL to its Engine.IO websocket form.
///
/// Scheme maps `http → ws` and `https → wss`; a bare or root path becomes
/// `/socket.io/`; the `EIO`/`transport` query parameters are added when the
/// URL has no query of its own.
fn rewrite_engine_io(mut url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => other,
    }
    .to_string();

    url.set_scheme(&scheme)
        .map_err(|()| Error::config(format!("Cannot rewrite scheme for {url}")))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(ENGINE_IO_PATH);
    }

    if url.query().is_none() {
        url.set_query(Some(ENGINE_IO_QUERY));
    }

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(url: &str) -> Url {
        Url::parse(url).expect("valid test url")
    }

    #[test]
    fn test_request_response_schemes() {
        assert!(Endpoint::new(parse("http://localhost:8080/"), Protocol::RequestResponse).is_ok());
        assert!(Endpoint::new(parse("https://localhost:8080/"), Protocol::RequestResponse).is_ok());

        let err = Endpoint::new(parse("ws://localhost:8080/"), Protocol::RequestResponse)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_duplex_schemes() {
        assert!(Endpoint::new(parse("ws://localhost:9001/"), Protocol::Duplex).is_ok());
        assert!(Endpoint::new(parse("wss://localhost:9001/"), Protocol::Duplex).is_ok());

        let err = Endpoint::new(parse("https://localhost:9001/"), Protocol::Duplex).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_multiplex_rewrites_http() {
        let endpoint =
            Endpoint::new(parse("http://localhost:8080"), Protocol::Multiplex).unwrap();
        assert_eq!(
            endpoint.url().as_str(),
            "ws://localhost:8080/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_multiplex_rewrites_https_to_wss() {
        let endpoint =
            Endpoint::new(parse("https://localhost:8443/"), Protocol::Multiplex).unwrap();
        assert!(endpoint.url().as_str().starts_with("wss://"));
    }

    #[test]
    fn test_multiplex_keeps_explicit_path() {
        let endpoint = Endpoint::new(
            parse("ws://localhost:8080/custom.io/?EIO=4&transport=websocket"),
            Protocol::Multiplex,
        )
        .unwrap();
        assert_eq!(endpoint.url().path(), "/custom.io/");
    }

    #[test]
    fn test_multiplex_rejects_other_schemes() {
        let err = Endpoint::new(parse("ftp://localhost/"), Protocol::Multiplex).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_join_path() {
        let endpoint =
            Endpoint::new(parse("http://localhost:8080"), Protocol::RequestResponse).unwrap();

        let joined = endpoint.join_path("/ping").unwrap();
        assert_eq!(joined.as_str(), "http://localhost:8080/ping");

        let joined = endpoint.join_path("api/status").unwrap();
        assert_eq!(joined.as_str(), "http://localhost:8080/api/status");
    }
}
