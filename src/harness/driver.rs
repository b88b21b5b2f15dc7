//! Per-session interactive driver.
//!
//! One driver owns one session end to end: it connects through the adapter,
//! relays operator lines, renders inbound events, and settles into
//! `Terminated` exactly once, whether the session ends by sentinel, peer
//! closure, connect failure, or an external interrupt.
//!
//! # State Machine
//!
//! ```text
//! Idle → Connecting → Ready → Draining → Terminated
//!              └────────────────────────────↑
//!                  (connect failure goes straight to Terminated)
//! ```
//!
//! The driver multiplexes three channels and never blocks one on another:
//! operator input, inbound session events, and the shutdown watch. Rendered
//! output goes to its own channel so a slow console cannot stall the loop.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::adapter::{ConnectOptions, ProtocolAdapter};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::session::{InboundEvent, OutboundMessage, Session, parse_form_pairs};

use super::is_exit_sentinel;

// ============================================================================
// DriverState
// ============================================================================

/// Lifecycle of one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    /// Not started.
    #[default]
    Idle,
    /// Connect in flight.
    Connecting,
    /// Connected; relaying input and events.
    Ready,
    /// Close requested; waiting for the session to report closure.
    Draining,
    /// Done. Terminal.
    Terminated,
}

// ============================================================================
// DriverOutcome
// ============================================================================

/// What one session amounted to, reported when the driver terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOutcome {
    /// Pool index of this session.
    pub index: usize,
    /// The session terminated on a connect-phase failure, before any
    /// message exchange.
    pub connect_failed: bool,
    /// Messages successfully handed to the transport.
    pub sent: u64,
    /// Messages received from the peer.
    pub received: u64,
}

// ============================================================================
// DriverHandles
// ============================================================================

/// Channels wiring one driver into the harness.
pub struct DriverHandles {
    /// Operator lines for this session.
    pub input_rx: mpsc::UnboundedReceiver<String>,
    /// Rendered output lines.
    pub output_tx: mpsc::UnboundedSender<String>,
    /// External interrupt; flips to `true` on Ctrl-C.
    pub shutdown_rx: watch::Receiver<bool>,
}

// ============================================================================
// HarnessDriver
// ============================================================================

/// Drives one session interactively until it terminates.
pub struct HarnessDriver {
    endpoint: Endpoint,
    adapter: Arc<dyn ProtocolAdapter>,
    options: ConnectOptions,
    handles: DriverHandles,
    index: usize,
    labeled: bool,
    initial_body: Option<String>,
    admit_tx: Option<oneshot::Sender<bool>>,
    state: DriverState,
}

// ============================================================================
// Construction
// ============================================================================

impl HarnessDriver {
    /// Creates a driver for one session.
    #[must_use]
    pub fn new(
        endpoint: Endpoint,
        adapter: Arc<dyn ProtocolAdapter>,
        options: ConnectOptions,
        handles: DriverHandles,
    ) -> Self {
        Self {
            endpoint,
            adapter,
            options,
            handles,
            index: 0,
            labeled: false,
            initial_body: None,
            admit_tx: None,
            state: DriverState::Idle,
        }
    }

    /// Labels this driver's output with its pool index.
    #[inline]
    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self.labeled = true;
        self
    }

    /// Sends `body` as the first message right after connecting.
    #[inline]
    #[must_use]
    pub fn with_initial_body(mut self, body: impl Into<String>) -> Self {
        self.initial_body = Some(body.into());
        self
    }

    /// Notifies the pool when the connect attempt resolves, for sequential
    /// admission.
    #[inline]
    #[must_use]
    pub fn with_admission_signal(mut self, admit_tx: oneshot::Sender<bool>) -> Self {
        self.admit_tx = Some(admit_tx);
        self
    }
}

// ============================================================================
// Run Loop
// ============================================================================

impl HarnessDriver {
    /// Runs the session to completion.
    ///
    /// Never panics and never returns early: every path ends in
    /// `Terminated` with an outcome.
    pub async fn run(mut self) -> DriverOutcome {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        self.state = DriverState::Connecting;
        debug!(index = self.index, endpoint = %self.endpoint, "Connecting");

        let connect = timeout(
            self.options.connect_timeout,
            self.adapter.connect(&self.endpoint, &self.options, event_tx),
        );

        let link = match connect.await {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => return self.fail_connect(err),
            Err(_) => {
                let timeout_ms = self.options.connect_timeout.as_millis() as u64;
                return self.fail_connect(Error::connection_timeout(timeout_ms));
            }
        };

        self.notify_admission(true);
        self.state = DriverState::Ready;

        let mut session = Session::new(self.endpoint.clone(), link);
        let mut sent: u64 = 0;
        let mut received: u64 = 0;

        if let Some(body) = self.initial_body.take() {
            let message = OutboundMessage {
                form: Some(parse_form_pairs(&body)),
                text: body,
            };
            match session.send(&message).await {
                Ok(()) => sent += 1,
                Err(err) => self.emit(&format!("Error: {err}")),
            }
        }

        let mut input_open = true;
        let mut watch_alive = true;

        while self.state != DriverState::Terminated {
            tokio::select! {
                line = self.handles.input_rx.recv(), if input_open => {
                    match line {
                        Some(line) => self.handle_line(&line, &mut session, &mut sent).await,
                        None => {
                            // Operator input is gone; nothing more to relay
                            input_open = false;
                            self.drain(&session).await;
                        }
                    }
                }

                event = event_rx.recv() => {
                    self.handle_event(event, &mut received);
                }

                changed = self.handles.shutdown_rx.changed(), if watch_alive => {
                    match changed {
                        Ok(()) if *self.handles.shutdown_rx.borrow() => {
                            debug!(index = self.index, "Interrupt received");
                            self.drain(&session).await;
                        }
                        Ok(()) => {}
                        Err(_) => watch_alive = false,
                    }
                }
            }
        }

        DriverOutcome {
            index: self.index,
            connect_failed: false,
            sent,
            received,
        }
    }

    /// Handles one operator line.
    async fn handle_line(&mut self, line: &str, session: &mut Session, sent: &mut u64) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if is_exit_sentinel(trimmed) {
            self.drain(session).await;
            return;
        }

        if self.state != DriverState::Ready {
            trace!(index = self.index, "Line ignored while draining");
            return;
        }

        match session.send(&OutboundMessage::text(trimmed)).await {
            Ok(()) => *sent += 1,
            Err(err) => {
                self.emit(&format!("Error: {err}"));
                if err.is_connection_error() {
                    self.drain(session).await;
                }
            }
        }
    }

    /// Renders one inbound event and advances the state machine.
    fn handle_event(&mut self, event: Option<InboundEvent>, received: &mut u64) {
        match event {
            Some(InboundEvent::Opened) => self.emit("Connected"),

            Some(InboundEvent::MessageReceived(text)) => {
                *received += 1;
                self.emit(&format!("Received: {text}"));
            }

            Some(InboundEvent::ErrorOccurred(description)) => {
                self.emit(&format!("Error: {description}"));
            }

            Some(InboundEvent::Closed { code, reason }) => {
                debug!(index = self.index, ?code, %reason, "Session closed");
                self.emit("Connection closed");
                self.state = DriverState::Terminated;
            }

            // The adapter vanished without reporting closure
            None => {
                self.emit("Connection closed");
                self.state = DriverState::Terminated;
            }
        }
    }

    /// Requests close once; later calls are no-ops.
    async fn drain(&mut self, session: &Session) {
        if matches!(self.state, DriverState::Draining | DriverState::Terminated) {
            return;
        }
        self.state = DriverState::Draining;
        session.close().await;
    }

    /// Terminates on a connect-phase failure.
    fn fail_connect(&mut self, err: Error) -> DriverOutcome {
        warn!(index = self.index, error = %err, "Connect failed");
        self.emit(&format!("Error: {err}"));
        self.notify_admission(false);
        self.state = DriverState::Terminated;

        DriverOutcome {
            index: self.index,
            connect_failed: true,
            sent: 0,
            received: 0,
        }
    }

    /// Tells the pool this session's connect attempt has resolved.
    fn notify_admission(&mut self, connected: bool) {
        if let Some(admit_tx) = self.admit_tx.take() {
            let _ = admit_tx.send(connected);
        }
    }

    /// Emits one rendered output line, labeled with the pool index when this
    /// driver belongs to a multi-client pool.
    fn emit(&self, text: &str) {
        let line = if self.labeled {
            format!("[client {}] {text}", self.index)
        } else {
            text.to_string()
        };

        if self.handles.output_tx.send(line).is_err() {
            trace!(index = self.index, "Output channel closed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
