//! Wireprobe - Interactive multi-protocol test-client harness.
//!
//! This library drives one or more interactive sessions against a server
//! over a choice of protocols, relaying operator-entered lines as outbound
//! messages and printing whatever comes back.
//!
//! # Architecture
//!
//! The harness is parameterized by a protocol adapter and contains no
//! protocol-specific logic of its own:
//!
//! - **Adapter**: translates connect/send/close into protocol calls and
//!   pushes [`InboundEvent`]s to a per-session channel
//! - **Driver**: one session's state machine; multiplexes operator input,
//!   session events, and the interrupt signal
//! - **Pool**: N independent drivers for fan-out testing, sharing nothing
//!
//! Key design principles:
//!
//! - Event delivery over channels, never callbacks into harness state
//! - One `Closed` notice per session, no matter which side shuts down first
//! - TLS verification on by default; opting out is explicit configuration
//! - Errors stop at the session boundary, never the process
//!
//! # Quick Start
//!
//! ```no_run
//! use tokio::sync::{mpsc, watch};
//! use wireprobe::{ClientPool, HarnessConfig, Protocol, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = HarnessConfig::new("ws://localhost:8080/", Protocol::Duplex)?;
//!
//!     let line_rx = wireprobe::harness::input::spawn_stdin_reader();
//!     let (output_tx, mut output_rx) = mpsc::unbounded_channel();
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     tokio::spawn(async move {
//!         while let Some(line) = output_rx.recv().await {
//!             println!("{line}");
//!         }
//!     });
//!
//!     let outcomes = ClientPool::new(config)
//!         .run(line_rx, output_tx, shutdown_rx)
//!         .await?;
//!     std::process::exit(wireprobe::exit_code(&outcomes));
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapter`] | Protocol adapters: request-response, duplex, multiplex |
//! | [`config`] | Harness configuration and protocol selectors |
//! | [`endpoint`] | Endpoint validation and URL rewriting |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`harness`] | Driver, pool, and input routing |
//! | [`session`] | Session lifecycle, messages, and events |

// ============================================================================
// Modules
// ============================================================================

/// Protocol adapters.
///
/// Each adapter implements the common connect/send/close/event contract for
/// one transport style.
pub mod adapter;

/// Harness configuration.
///
/// Recognized options, protocol selectors, and the admission policy.
pub mod config;

/// Endpoint addressing and validation.
pub mod endpoint;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Interactive harness: driver, pool, input routing.
pub mod harness;

/// Session data model: lifecycle states, messages, events.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

// Adapter types
pub use adapter::{
    ConnectOptions, DuplexAdapter, MultiplexAdapter, ProtocolAdapter, RequestResponseAdapter,
    SessionLink, adapter_for,
};

// Configuration types
pub use config::{AdmissionPolicy, HarnessConfig, HttpMethod, Protocol};

// Endpoint types
pub use endpoint::Endpoint;

// Error types
pub use error::{Error, Result};

// Harness types
pub use harness::{
    ClientPool, DriverHandles, DriverOutcome, DriverState, HarnessDriver, exit_code,
};

// Session types
pub use session::{EventSink, InboundEvent, OutboundMessage, Session, SessionState};
