//! Protocol adapters.
//!
//! An adapter translates the harness-level contract (connect, send, close,
//! event delivery) into protocol-specific calls. The harness itself carries
//! no protocol logic; it drives whichever [`SessionLink`] the adapter hands
//! back and consumes [`InboundEvent`]s from the sink it supplied at connect
//! time.
//!
//! # Variants
//!
//! | Module | Adapter | Transport |
//! |--------|---------|-----------|
//! | `request_response` | [`RequestResponseAdapter`] | one HTTP request per send |
//! | `duplex` | [`DuplexAdapter`] | persistent raw WebSocket |
//! | `multiplex` | [`MultiplexAdapter`] | Socket.IO-style event stream over WebSocket |

// ============================================================================
// Submodules
// ============================================================================

/// Persistent raw WebSocket adapter.
pub mod duplex;

/// Socket.IO-style multiplexed stream adapter.
pub mod multiplex;

/// Stateless HTTP request/response adapter.
pub mod request_response;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{HarnessConfig, HttpMethod, Protocol};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::session::{EventSink, OutboundMessage, SessionState};

// ============================================================================
// Re-exports
// ============================================================================

pub use duplex::DuplexAdapter;
pub use multiplex::MultiplexAdapter;
pub use request_response::RequestResponseAdapter;

// ============================================================================
// ConnectOptions
// ============================================================================

/// Per-connect options shared by all adapters.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Verify TLS certificates. Defaults to `true`.
    pub verify_tls: bool,

    /// Bound on the connect step.
    pub connect_timeout: Duration,

    /// HTTP verb (request-response only).
    pub http_method: HttpMethod,

    /// Request headers (request-response only).
    pub headers: Vec<(String, String)>,
}

impl ConnectOptions {
    /// Extracts the connect options from a harness configuration.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            verify_tls: config.verify_tls,
            connect_timeout: config.connect_timeout,
            http_method: config.http_method,
            headers: config.headers.clone(),
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            verify_tls: true,
            connect_timeout: crate::config::DEFAULT_CONNECT_TIMEOUT,
            http_method: HttpMethod::default(),
            headers: Vec::new(),
        }
    }
}

// ============================================================================
// ProtocolAdapter
// ============================================================================

/// Factory side of the adapter contract.
///
/// `connect` establishes the underlying transport and hands back the link the
/// harness will drive. All inbound traffic and lifecycle changes flow through
/// the supplied `events` sink; the harness never polls.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Establishes the underlying transport.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Connection`] if the endpoint is unreachable or the
    ///   handshake fails
    /// - [`crate::Error::UnsupportedScheme`] if the endpoint scheme does not
    ///   match this adapter
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Box<dyn SessionLink>>;
}

// ============================================================================
// SessionLink
// ============================================================================

/// Established-transport side of the adapter contract.
#[async_trait]
pub trait SessionLink: Send + Sync {
    /// Transmits one message.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::ConnectionClosed`] if the session is not in
    ///   `Connected` state
    /// - [`crate::Error::Transport`] on underlying I/O failure
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Closes the session and releases transport resources.
    ///
    /// Idempotent: safe to call multiple times and from a concurrent
    /// cancellation path. Exactly one `Closed` event reaches the sink no
    /// matter how many callers race.
    async fn close(&self);

    /// Returns the current lifecycle state.
    fn state(&self) -> SessionState;
}

// ============================================================================
// Adapter Selection
// ============================================================================

/// Returns the adapter for a protocol selector.
#[must_use]
pub fn adapter_for(protocol: Protocol) -> Arc<dyn ProtocolAdapter> {
    match protocol {
        Protocol::RequestResponse => Arc::new(RequestResponseAdapter::new()),
        Protocol::Duplex => Arc::new(DuplexAdapter::new()),
        Protocol::Multiplex => Arc::new(MultiplexAdapter::new()),
    }
}

// ============================================================================
// Test Support
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_config() {
        let config = HarnessConfig::new("https://localhost/", Protocol::RequestResponse)
            .unwrap()
            .with_insecure_tls()
            .with_method(HttpMethod::Post);

        let options = ConnectOptions::from_config(&config);
        assert!(!options.verify_tls);
        assert_eq!(options.http_method, HttpMethod::Post);
        assert_eq!(options.headers, config.headers);
    }

    #[test]
    fn test_connect_options_default_verifies_tls() {
        assert!(ConnectOptions::default().verify_tls);
    }

    #[test]
    fn test_adapter_selection_covers_all_protocols() {
        for protocol in [
            Protocol::RequestResponse,
            Protocol::Duplex,
            Protocol::Multiplex,
        ] {
            let _ = adapter_for(protocol);
        }
    }
}
