//! Persistent raw WebSocket adapter.
//!
//! `connect` dials the endpoint and spawns a dedicated event-loop task that
//! owns both halves of the socket. The harness talks to the loop over a
//! command channel; the loop pushes inbound frames and lifecycle changes to
//! the per-session event sink.
//!
//! # Event Loop
//!
//! The loop multiplexes two sources:
//!
//! - Inbound frames from the peer: every text frame emits `MessageReceived`;
//!   a close frame, stream end, or read error ends the session.
//! - Commands from the harness: `Send` writes one frame and acknowledges the
//!   caller over a oneshot; `Close` writes a close frame and ends the loop.
//!
//! All shutdown paths funnel through a first-wins guard, so `Closed` reaches
//! the sink exactly once even when local close and peer-initiated closure
//! race.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::session::{EventSink, InboundEvent, OutboundMessage, SessionState, StateCell};

use super::{ConnectOptions, ProtocolAdapter, SessionLink};

// ============================================================================
// Types
// ============================================================================

/// The socket type produced by the client handshake.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half owned by the event loop.
type WsSink = SplitSink<WsStream, Message>;

/// Commands from the harness to the event loop.
pub(crate) enum LinkCommand {
    /// Write one text frame and acknowledge the caller.
    Send {
        text: String,
        done: oneshot::Sender<Result<()>>,
    },
    /// Close the socket and end the loop.
    Close,
}

// ============================================================================
// DuplexAdapter
// ============================================================================

/// Adapter for a persistent raw WebSocket session.
#[derive(Debug, Default)]
pub struct DuplexAdapter;

impl DuplexAdapter {
    /// Creates the adapter.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolAdapter for DuplexAdapter {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Box<dyn SessionLink>> {
        let ws_stream = dial(endpoint, options).await?;

        debug!(url = %endpoint.url(), "WebSocket connected");
        let _ = events.send(InboundEvent::Opened);

        Ok(Box::new(DuplexLink::spawn(ws_stream, events)))
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Performs the WebSocket client handshake, honoring the TLS policy.
pub(crate) async fn dial(endpoint: &Endpoint, options: &ConnectOptions) -> Result<WsStream> {
    let connector = tls_connector(endpoint, options)?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
        endpoint.url().as_str(),
        None,
        false,
        connector,
    )
    .await
    .map_err(|e| Error::connection(e.to_string()))?;

    Ok(ws_stream)
}

/// Builds a TLS connector when certificate verification is disabled.
///
/// With verification on (the default) the library's stock connector is used.
fn tls_connector(endpoint: &Endpoint, options: &ConnectOptions) -> Result<Option<Connector>> {
    if options.verify_tls || endpoint.url().scheme() != "wss" {
        return Ok(None);
    }

    warn!(url = %endpoint.url(), "TLS certificate verification disabled");

    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| Error::connection(e.to_string()))?;

    Ok(Some(Connector::NativeTls(tls)))
}

// ============================================================================
// DuplexLink
// ============================================================================

/// Harness-facing handle; the socket lives in the event-loop task.
pub(crate) struct DuplexLink {
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    state: StateCell,
}

impl DuplexLink {
    /// Spawns the event loop and returns the handle.
    pub(crate) fn spawn(ws_stream: WsStream, events: EventSink) -> Self {
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
impl SessionLink for DuplexLink {
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
        // The loop reports Closed; if it already ended, the guard has fired.
        let _ = self.command_tx.send(LinkCommand::Close);
    }

    fn state(&self) -> SessionState {
        self.state.get()
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Owns the socket; multiplexes peer frames and harness commands.
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
                        trace!(len = text.len(), "Frame received");
                        let _ = events.send(InboundEvent::MessageReceived(text.to_string()));
                    }

                    Some(Ok(Message::Binary(data))) => {
                        let _ = events.send(InboundEvent::MessageReceived(
                            String::from_utf8_lossy(&data).into_owned(),
                        ));
                    }

                    Some(Ok(Message::Close(frame))) => {
                        debug!("WebSocket closed by remote");
                        report_closed(&state, &events, frame);
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        let _ = events.send(InboundEvent::ErrorOccurred(e.to_string()));
                        report_closed(&state, &events, None);
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        report_closed(&state, &events, None);
                        break;
                    }

                    // Ping/Pong are handled by the protocol layer
                    _ => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(LinkCommand::Send { text, done }) => {
                        let result = write_frame(&mut ws_write, text).await;
                        let _ = done.send(result);
                    }

                    Some(LinkCommand::Close) | None => {
                        debug!("Local close requested");
                        let _ = ws_write.send(Message::Close(None)).await;
                        report_closed(&state, &events, None);
                        break;
                    }
                }
            }
        }
    }

    debug!("Event loop terminated");
}

/// Writes one text frame.
async fn write_frame(ws_write: &mut WsSink, text: String) -> Result<()> {
    ws_write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::transport(e.to_string()))
}

/// Reports closure through the first-wins guard.
fn report_closed(state: &StateCell, events: &EventSink, frame: Option<CloseFrame>) {
    if state.close_once() {
        let (code, reason) = match frame {
            Some(frame) => (Some(frame.code.into()), frame.reason.to_string()),
            None => (None, String::new()),
        };
        let _ = events.send(InboundEvent::Closed { code, reason });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use url::Url;

    use crate::config::Protocol;

    /// What the loopback server should do after the handshake.
    #[derive(Clone, Copy)]
    enum ServerScript {
        /// Echo every text frame until the peer closes.
        Echo,
        /// Close immediately after the handshake.
        CloseEagerly,
        /// Close right after the first inbound frame.
        CloseAfterFirstFrame,
    }

    async fn spawn_server(script: ServerScript) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream)
                        .await
                        .expect("server handshake");

                    match script {
                        ServerScript::Echo => {
                            while let Some(Ok(msg)) = ws.next().await {
                                match msg {
                                    Message::Text(text) => {
                                        let _ = ws.send(Message::Text(text)).await;
                                    }
                                    Message::Close(_) => break,
                                    _ => {}
                                }
                            }
                        }
                        ServerScript::CloseEagerly => {
                            let _ = ws.close(None).await;
                        }
                        ServerScript::CloseAfterFirstFrame => {
                            while let Some(Ok(msg)) = ws.next().await {
                                if matches!(msg, Message::Text(_)) {
                                    let _ = ws.close(None).await;
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        format!("ws://{addr}/")
    }

    async fn connect(
        url: &str,
    ) -> (
        Box<dyn SessionLink>,
        mpsc::UnboundedReceiver<InboundEvent>,
    ) {
        let endpoint =
            Endpoint::new(Url::parse(url).expect("url"), Protocol::Duplex).expect("endpoint");
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let link = DuplexAdapter::new()
            .connect(&endpoint, &ConnectOptions::default(), event_tx)
            .await
            .expect("connect");

        (link, event_rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) -> InboundEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within deadline")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let url = spawn_server(ServerScript::Echo).await;
        let (link, mut events) = connect(&url).await;

        assert_eq!(recv(&mut events).await, InboundEvent::Opened);

        link.send(&OutboundMessage::text("hello")).await.expect("send");
        assert_eq!(
            recv(&mut events).await,
            InboundEvent::MessageReceived("hello".to_string())
        );

        link.close().await;
        assert!(matches!(
            recv(&mut events).await,
            InboundEvent::Closed { .. }
        ));
    }

    #[tokio::test]
    async fn test_close_emits_exactly_one_closed() {
        let url = spawn_server(ServerScript::Echo).await;
        let (link, mut events) = connect(&url).await;

        assert_eq!(recv(&mut events).await, InboundEvent::Opened);

        link.close().await;
        link.close().await;
        link.close().await;

        assert!(matches!(
            recv(&mut events).await,
            InboundEvent::Closed { .. }
        ));

        // Give any spurious second report a chance to arrive, then drain
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, InboundEvent::Closed { .. }),
                "second Closed event observed"
            );
        }
    }

    #[tokio::test]
    async fn test_peer_close_reported_once() {
        let url = spawn_server(ServerScript::CloseEagerly).await;
        let (link, mut events) = connect(&url).await;

        assert_eq!(recv(&mut events).await, InboundEvent::Opened);
        assert!(matches!(
            recv(&mut events).await,
            InboundEvent::Closed { .. }
        ));

        // Local close after the peer already closed is a no-op
        link.close().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_and_peer_close_race() {
        let url = spawn_server(ServerScript::CloseAfterFirstFrame).await;
        let (link, mut events) = connect(&url).await;

        assert_eq!(recv(&mut events).await, InboundEvent::Opened);

        // The frame triggers a peer close while we close locally
        let _ = link.send(&OutboundMessage::text("bye")).await;
        link.close().await;

        let mut closed_count = 0;
        loop {
            match timeout(Duration::from_millis(500), events.recv()).await {
                Ok(Some(InboundEvent::Closed { .. })) => closed_count += 1,
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        assert_eq!(closed_count, 1);
    }

    #[tokio::test]
    async fn test_send_after_close_is_not_connected() {
        let url = spawn_server(ServerScript::Echo).await;
        let (link, mut events) = connect(&url).await;

        assert_eq!(recv(&mut events).await, InboundEvent::Opened);
        link.close().await;
        assert!(matches!(
            recv(&mut events).await,
            InboundEvent::Closed { .. }
        ));

        let err = link.send(&OutboundMessage::text("late")).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let endpoint = Endpoint::new(
            Url::parse(&format!("ws://{addr}/")).expect("url"),
            Protocol::Duplex,
        )
        .expect("endpoint");

        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let result = DuplexAdapter::new()
            .connect(&endpoint, &ConnectOptions::default(), event_tx)
            .await;

        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
