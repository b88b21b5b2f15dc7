//! Socket.IO-style multiplexed stream adapter.
//!
//! Speaks the Engine.IO v4 websocket transport with Socket.IO v5 framing on
//! the default namespace, the dialect the servers this harness exercises
//! actually expose. Only the subset the harness needs is implemented:
//! handshake, ping/pong, the `message` event, generic named events, and
//! explicit disconnect.
//!
//! # Wire Format
//!
//! Every frame is a text frame whose first byte is the Engine.IO packet type;
//! type `4` nests a Socket.IO packet type in the second byte:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `0{json}` | Engine.IO open (session id, ping schedule) |
//! | `1` | Engine.IO close |
//! | `2` / `3` | ping / pong |
//! | `40` | Socket.IO namespace connect / connect ack |
//! | `41` | Socket.IO disconnect |
//! | `42[...]` | Socket.IO event (optional ack id digits before the array) |
//! | `44{json}` | Socket.IO connect error |
//!
//! Disconnect is two-layered on purpose: `close` first announces the
//! Socket.IO-level disconnect (`41`) and then closes the transport, so the
//! server can tell an intentional goodbye from a dropped connection.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::session::{EventSink, InboundEvent, OutboundMessage, SessionState, StateCell};

use super::duplex::{WsStream, dial};
use super::{ConnectOptions, ProtocolAdapter, SessionLink};

// ============================================================================
// EngineOpen
// ============================================================================

/// Payload of the Engine.IO open packet.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EngineOpen {
    /// Engine.IO session id.
    pub sid: String,
    /// Server ping cadence in milliseconds.
    #[serde(default)]
    pub ping_interval: u64,
    /// Grace period for a pong in milliseconds.
    #[serde(default)]
    pub ping_timeout: u64,
}

// ============================================================================
// SioPacket
// ============================================================================

/// Decoded inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SioPacket {
    /// Engine.IO open with handshake data.
    Open(Value),
    /// Engine.IO close.
    Close,
    /// Engine.IO ping; must be answered with a pong.
    Ping,
    /// Engine.IO pong.
    Pong,
    /// Namespace connect acknowledged.
    ConnectAck(Option<Value>),
    /// Namespace-level disconnect.
    Disconnect,
    /// Namespace connect refused.
    ConnectError(String),
    /// An event on the namespace.
    Event {
        /// Event name (first array element).
        name: String,
        /// Event payload (second array element), if any.
        payload: Option<Value>,
        /// Acknowledgement id, when the sender requested one.
        ack_id: Option<u64>,
    },
    /// Anything this subset does not model.
    Unknown(String),
}

/// Decodes one inbound text frame.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when the frame claims a known type but its
/// body does not parse.
pub(crate) fn decode(raw: &str) -> Result<SioPacket> {
    let mut chars = raw.chars();

    match chars.next() {
        Some('0') => {
            let body: Value = serde_json::from_str(&raw[1..])
                .map_err(|e| Error::protocol(format!("Bad open packet: {e}")))?;
            Ok(SioPacket::Open(body))
        }
        Some('1') => Ok(SioPacket::Close),
        Some('2') => Ok(SioPacket::Ping),
        Some('3') => Ok(SioPacket::Pong),
        Some('4') => decode_socket_io(&raw[1..], raw),
        _ => Ok(SioPacket::Unknown(raw.to_string())),
    }
}

/// Decodes the Socket.IO layer of a type-4 Engine.IO packet.
fn decode_socket_io(rest: &str, raw: &str) -> Result<SioPacket> {
    let mut chars = rest.chars();

    match chars.next() {
        Some('0') => {
            let body = rest[1..].trim();
            if body.is_empty() {
                Ok(SioPacket::ConnectAck(None))
            } else {
                let value = serde_json::from_str(body)
                    .map_err(|e| Error::protocol(format!("Bad connect ack: {e}")))?;
                Ok(SioPacket::ConnectAck(Some(value)))
            }
        }
        Some('1') => Ok(SioPacket::Disconnect),
        Some('2') => decode_event(&rest[1..]),
        Some('4') => Ok(SioPacket::ConnectError(rest[1..].to_string())),
        _ => Ok(SioPacket::Unknown(raw.to_string())),
    }
}

/// Decodes an event body: optional ack-id digits followed by a JSON array.
fn decode_event(body: &str) -> Result<SioPacket> {
    let digits_end = body
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(body.len(), |(i, _)| i);

    let ack_id = if digits_end > 0 {
        body[..digits_end]
            .parse::<u64>()
            .ok()
    } else {
        None
    };

    let array: Value = serde_json::from_str(&body[digits_end..])
        .map_err(|e| Error::protocol(format!("Bad event body: {e}")))?;

    let Some(items) = array.as_array() else {
        return Err(Error::protocol("Event body is not an array"));
    };

    let Some(name) = items.first().and_then(Value::as_str) else {
        return Err(Error::protocol("Event has no name"));
    };

    Ok(SioPacket::Event {
        name: name.to_string(),
        payload: items.get(1).cloned(),
        ack_id,
    })
}

/// Encodes an outbound `message` event.
pub(crate) fn encode_message(text: &str) -> String {
    format!("42{}", json!(["message", text]))
}

/// Renders an inbound event for the operator.
///
/// `message` events collapse to their bare payload; generic events keep
/// their name as a prefix.
pub(crate) fn render_event(name: &str, payload: Option<&Value>) -> String {
    let payload_text = payload.map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    match (name, payload_text) {
        ("message", Some(text)) => text,
        ("message", None) => String::new(),
        (name, Some(text)) => format!("{name} {text}"),
        (name, None) => name.to_string(),
    }
}

// ============================================================================
// MultiplexAdapter
// ============================================================================

/// Adapter for a Socket.IO-style multiplexed session.
#[derive(Debug, Default)]
pub struct MultiplexAdapter;

impl MultiplexAdapter {
    /// Creates the adapter.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolAdapter for MultiplexAdapter {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Box<dyn SessionLink>> {
        let mut ws_stream = dial(endpoint, options).await?;

        let open = handshake(&mut ws_stream).await?;
        debug!(
            sid = %open.sid,
            ping_interval = open.ping_interval,
            ping_timeout = open.ping_timeout,
            "Namespace connected"
        );

        let _ = events.send(InboundEvent::Opened);

        Ok(Box::new(MultiplexLink::spawn(ws_stream, events)))
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Completes the Engine.IO open and Socket.IO namespace connect.
///
/// The caller bounds the whole connect step with a timeout, so this loop can
/// wait indefinitely for the server's answers.
async fn handshake(ws_stream: &mut WsStream) -> Result<EngineOpen> {
    // Engine.IO open
    let open = loop {
        match next_packet(ws_stream).await? {
            SioPacket::Open(body) => {
                break serde_json::from_value::<EngineOpen>(body)
                    .map_err(|e| Error::protocol(format!("Bad open payload: {e}")))?;
            }
            SioPacket::Ping => pong(ws_stream).await?,
            other => {
                trace!(?other, "Ignored pre-open packet");
            }
        }
    };

    // Socket.IO namespace connect on the default namespace
    ws_stream
        .send(Message::Text("40".into()))
        .await
        .map_err(|e| Error::connection(e.to_string()))?;

    loop {
        match next_packet(ws_stream).await? {
            SioPacket::ConnectAck(_) => return Ok(open),
            SioPacket::ConnectError(detail) => {
                return Err(Error::connection(format!("Namespace refused: {detail}")));
            }
            SioPacket::Ping => pong(ws_stream).await?,
            other => {
                trace!(?other, "Ignored pre-ack packet");
            }
        }
    }
}

/// Reads the next decodable packet during the handshake.
async fn next_packet(ws_stream: &mut WsStream) -> Result<SioPacket> {
    loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => return decode(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::connection("Closed during handshake"));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::connection(e.to_string())),
        }
    }
}

/// Answers an Engine.IO ping.
async fn pong(ws_stream: &mut WsStream) -> Result<()> {
    ws_stream
        .send(Message::Text("3".into()))
        .await
        .map_err(|e| Error::connection(e.to_string()))
}

// ============================================================================
// MultiplexLink
// ============================================================================

/// Commands from the harness to the event loop.
enum LinkCommand {
    Send {
        text: String,
        done: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Harness-facing handle; the socket lives in the event-loop task.
struct MultiplexLink {
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    state: StateCell,
}

impl MultiplexLink {
    /// Spawns the event loop and returns the handle.
    fn spawn(ws_stream: WsStream, events: EventSink) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = StateCell::new(SessionState::Connected);

        tokio::spawn(run_event_loop(
            ws_stream,
            command_rx,
            events,
            state.clone(),
        ));

        Self { command_tx, state }
    }
}

#[async_trait]
impl SessionLink for MultiplexLink {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if !self.state.get().is_connected() {
            return Err(Error::ConnectionClosed);
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.command_tx
            .send(LinkCommand::Send {
                text: message.text.clone(),
                done: done_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        done_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    async fn close(&self) {
        self.state.advance(SessionState::Closing);
        let _ = self.command_tx.send(LinkCommand::Close);
    }

    fn state(&self) -> SessionState {
        self.state.get()
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Owns the socket; multiplexes peer packets and harness commands.
async fn run_event_loop(
    ws_stream: WsStream,
    mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
    events: EventSink,
    state: StateCell,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if handle_packet(&text, &mut ws_write, &events, &state).await {
                            break;
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("Transport closed by remote");
                        report_closed(&state, &events);
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        let _ = events.send(InboundEvent::ErrorOccurred(e.to_string()));
                        report_closed(&state, &events);
                        break;
                    }

                    None => {
                        debug!("Transport stream ended");
                        report_closed(&state, &events);
                        break;
                    }

                    _ => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(LinkCommand::Send { text, done }) => {
                        let result = ws_write
                            .send(Message::Text(encode_message(&text).into()))
                            .await
                            .map_err(|e| Error::transport(e.to_string()));
                        let _ = done.send(result);
                    }

                    Some(LinkCommand::Close) | None => {
                        debug!("Local disconnect requested");
                        // Socket.IO goodbye first, then the transport close
                        let _ = ws_write.send(Message::Text("41".into())).await;
                        let _ = ws_write.send(Message::Close(None)).await;
                        report_closed(&state, &events);
                        break;
                    }
                }
            }
        }
    }

    debug!("Event loop terminated");
}

/// Handles one decoded inbound packet. Returns `true` when the loop must end.
async fn handle_packet(
    raw: &str,
    ws_write: &mut futures_util::stream::SplitSink<WsStream, Message>,
    events: &EventSink,
    state: &StateCell,
) -> bool {
    match decode(raw) {
        Ok(SioPacket::Ping) => {
            let _ = ws_write.send(Message::Text("3".into())).await;
            false
        }

        Ok(SioPacket::Event { name, payload, ack_id }) => {
            trace!(%name, ?ack_id, "Event received");
            let _ = events.send(InboundEvent::MessageReceived(render_event(
                &name,
                payload.as_ref(),
            )));
            false
        }

        Ok(SioPacket::Disconnect) => {
            debug!("Namespace disconnected by remote");
            report_closed(state, events);
            true
        }

        Ok(SioPacket::Close) => {
            debug!("Engine session closed by remote");
            report_closed(state, events);
            true
        }

        Ok(_) => false,

        Err(e) => {
            let _ = events.send(InboundEvent::ErrorOccurred(e.to_string()));
            false
        }
    }
}

/// Reports closure through the first-wins guard.
fn report_closed(state: &StateCell, events: &EventSink) {
    if state.close_once() {
        let _ = events.send(InboundEvent::closed());
    }
}

// ============================================================================
// Tests
// ============================================================================
