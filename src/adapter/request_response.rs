//! Stateless HTTP request/response adapter.
//!
//! There is no persistent connection: `connect` only builds the HTTP client,
//! and every `send` performs exactly one request with the configured verb.
//! The outcome of each request surfaces as a single event: a
//! `MessageReceived` carrying `"<status code> <body>"` on any HTTP response,
//! or an `ErrorOccurred` on network failure. HTTP error statuses are data,
//! not errors; the operator asked the server a question and gets to see the
//! answer either way.
//!
//! Operator line handling per verb:
//!
//! - `GET`/`DELETE`: the line is a path suffix appended to the endpoint URL
//!   (an empty first send hits the base URL itself).
//! - `POST`/`PUT`: the line is a form-encoded `key=value&key=value` body
//!   sent to the endpoint URL.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use crate::config::HttpMethod;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::session::{EventSink, InboundEvent, OutboundMessage, SessionState, StateCell};

use super::{ConnectOptions, ProtocolAdapter, SessionLink};

// ============================================================================
// RequestResponseAdapter
// ============================================================================

/// Adapter performing one HTTP request per send.
#[derive(Debug, Default)]
pub struct RequestResponseAdapter;

impl RequestResponseAdapter {
    /// Creates the adapter.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolAdapter for RequestResponseAdapter {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Box<dyn SessionLink>> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!options.verify_tls)
            .connect_timeout(options.connect_timeout)
            .build()?;

        debug!(
            url = %endpoint.url(),
            method = %options.http_method,
            verify_tls = options.verify_tls,
            "HTTP client ready"
        );

        Ok(Box::new(RequestLink {
            client,
            endpoint: endpoint.clone(),
            method: options.http_method,
            headers: options.headers.clone(),
            events,
            state: StateCell::new(SessionState::Connected),
        }))
    }
}

// ============================================================================
// RequestLink
// ============================================================================

/// Link carrying the configured client; no transport state survives between
/// sends.
struct RequestLink {
    client: Client,
    endpoint: Endpoint,
    method: HttpMethod,
    headers: Vec<(String, String)>,
    events: EventSink,
    state: StateCell,
}

impl RequestLink {
    /// Resolves the request URL for one message.
    fn request_url(&self, message: &OutboundMessage) -> Result<Url> {
        if self.method.has_body() || message.text.is_empty() {
            Ok(self.endpoint.url().clone())
        } else {
            self.endpoint.join_path(&message.text)
        }
    }

    /// Performs one request and reports its outcome through the sink.
    async fn perform(&self, message: &OutboundMessage) -> Result<()> {
        let url = self.request_url(message)?;

        let mut request = match self.method {
            HttpMethod::Get => self.client.get(url.clone()),
            HttpMethod::Post => self.client.post(url.clone()),
            HttpMethod::Put => self.client.put(url.clone()),
            HttpMethod::Delete => self.client.delete(url.clone()),
        };

        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if self.method.has_body() {
            request = request.form(&message.form_pairs());
        }

        trace!(%url, method = %self.method, "Request sent");

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let _ = self
                    .events
                    .send(InboundEvent::MessageReceived(format!("{status} {body}")));
            }
            Err(err) => {
                let _ = self.events.send(InboundEvent::ErrorOccurred(err.to_string()));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SessionLink for RequestLink {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if !self.state.get().is_connected() {
            return Err(Error::ConnectionClosed);
        }
        self.perform(message).await
    }

    async fn close(&self) {
        if self.state.close_once() {
            let _ = self.events.send(InboundEvent::closed());
            debug!("HTTP session closed");
        }
    }

    fn state(&self) -> SessionState {
        self.state.get()
    }
}

// ============================================================================
// Tests
// ============================================================================
