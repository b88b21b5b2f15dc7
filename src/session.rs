//! Session data model.
//!
//! A [`Session`] is one logical connection: the endpoint it was opened
//! against, the protocol link carrying it, and its observable lifecycle
//! state. Sessions are owned exclusively by the driver that created them and
//! share nothing with sibling sessions.
//!
//! Inbound traffic is modeled as explicit [`InboundEvent`] values delivered
//! over a per-session channel rather than as callbacks, so a transport
//! library's task context never re-enters harness state directly.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::adapter::SessionLink;
use crate::endpoint::Endpoint;
use crate::error::Result;

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of one logical connection.
///
/// Transitions only ever move forward:
/// `Disconnected → Connecting → Connected → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No transport established yet.
    #[default]
    Disconnected,
    /// Connect in flight.
    Connecting,
    /// Transport established; sends are accepted.
    Connected,
    /// Close requested; no further sends are accepted.
    Closing,
    /// Transport released; terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` if the session accepts sends.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if the session has reached its terminal state.
    #[inline]
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// StateCell
// ============================================================================

/// Shared, forward-only session state.
///
/// Cloned into the transport's event-loop task; both sides observe the same
/// lifecycle. Transitions never move backwards, so a racing `Closing` and
/// `Closed` always settle on `Closed`.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<SessionState>>);

impl StateCell {
    /// Creates a cell in the given initial state.
    #[inline]
    #[must_use]
    pub fn new(initial: SessionState) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn get(&self) -> SessionState {
        *self.0.lock()
    }

    /// Advances to `next` if it is a forward transition.
    pub fn advance(&self, next: SessionState) {
        let mut state = self.0.lock();
        if rank(next) > rank(*state) {
            *state = next;
        }
    }

    /// Transitions to `Closed`, returning `true` only for the first caller.
    ///
    /// This is the first-wins guard behind the "exactly one `Closed` event"
    /// guarantee: whichever shutdown path gets here first reports closure,
    /// every later caller is a no-op.
    pub fn close_once(&self) -> bool {
        let mut state = self.0.lock();
        if state.is_closed() {
            false
        } else {
            *state = SessionState::Closed;
            true
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(SessionState::Disconnected)
    }
}

/// Ordering of lifecycle states for forward-only transitions.
const fn rank(state: SessionState) -> u8 {
    match state {
        SessionState::Disconnected => 0,
        SessionState::Connecting => 1,
        SessionState::Connected => 2,
        SessionState::Closing => 3,
        SessionState::Closed => 4,
    }
}

// ============================================================================
// OutboundMessage
// ============================================================================

/// One operator-entered payload, constructed per send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Raw text as entered.
    pub text: String,
    /// Structured form payload, when pre-parsed by the caller.
    pub form: Option<Vec<(String, String)>>,
}

impl OutboundMessage {
    /// Creates a plain text message.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            form: None,
        }
    }

    /// Returns the form pairs for this message.
    ///
    /// Uses the structured payload when present, otherwise parses the raw
    /// text as `key=value&key=value` pairs. A segment without `=` becomes a
    /// key with an empty value.
    #[must_use]
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        if let Some(form) = &self.form {
            return form.clone();
        }
        parse_form_pairs(&self.text)
    }
}

/// Parses `key=value&key=value` text into pairs.
pub(crate) fn parse_form_pairs(text: &str) -> Vec<(String, String)> {
    text.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (segment.to_string(), String::new()),
        })
        .collect()
}

// ============================================================================
// InboundEvent
// ============================================================================

/// A lifecycle or traffic event produced by an adapter.
///
/// Delivered over the per-session [`EventSink`] in transport order; the
/// harness consumes them without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// The connection is established and confirmed by the peer.
    Opened,
    /// One inbound message, verbatim.
    MessageReceived(String),
    /// A recoverable error surfaced by the transport.
    ErrorOccurred(String),
    /// The connection is gone. Emitted exactly once per session no matter
    /// which side initiated shutdown.
    Closed {
        /// Close code, when the transport carries one.
        code: Option<u16>,
        /// Human-readable close reason; may be empty.
        reason: String,
    },
}

impl InboundEvent {
    /// Creates a `Closed` event with no code and an empty reason.
    #[inline]
    #[must_use]
    pub fn closed() -> Self {
        Self::Closed {
            code: None,
            reason: String::new(),
        }
    }
}

/// Per-session event channel supplied to an adapter at connect time.
pub type EventSink = mpsc::UnboundedSender<InboundEvent>;

// ============================================================================
// Session
// ============================================================================

/// One logical connection owned by a harness driver.
pub struct Session {
    endpoint: Endpoint,
    link: Box<dyn SessionLink>,
    last_error: Option<String>,
}

impl Session {
    /// Wraps an established link.
    #[inline]
    #[must_use]
    pub fn new(endpoint: Endpoint, link: Box<dyn SessionLink>) -> Self {
        Self {
            endpoint,
            link,
            last_error: None,
        }
    }

    /// Returns the endpoint this session was opened against.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.link.state()
    }

    /// Returns the most recent send error, if any.
    #[inline]
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Transmits a message on this session.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::ConnectionClosed`] if the session is not connected
    /// - [`crate::Error::Transport`] on underlying I/O failure
    pub async fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        match self.link.send(message).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Closes this session.
    ///
    /// Idempotent; safe to call again after the peer already closed.
    pub async fn close(&self) {
        self.link.close().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("last_error", &self.last_error)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
