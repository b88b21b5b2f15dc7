//! Wireprobe CLI.
//!
//! Interactive test client for exercising a server over plain HTTP(S)
//! request/response, raw WebSocket messaging, or Socket.IO-style
//! multiplexed messaging.
//!
//! Type lines to send them; `exit` ends a session; Ctrl-C drains every
//! session gracefully. In a multi-client run, prefix a line with `N:` to
//! target client N.

// ============================================================================
// Imports
// ============================================================================

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use wireprobe::harness::input::spawn_stdin_reader;
use wireprobe::{
    AdmissionPolicy, ClientPool, Error, HarnessConfig, HttpMethod, Protocol, Result, exit_code,
};

// ============================================================================
// Cli
// ============================================================================

/// Interactive multi-protocol test-client harness.
#[derive(Debug, Parser)]
#[command(name = "wireprobe", version, about)]
struct Cli {
    /// Endpoint URL (http/https for request-response, ws/wss for duplex,
    /// either for multiplex).
    #[arg(long)]
    url: String,

    /// Protocol: request-response, duplex, or multiplex.
    #[arg(long, default_value = "duplex")]
    protocol: String,

    /// HTTP method for request-response mode: GET, POST, PUT, or DELETE.
    #[arg(long, default_value = "GET")]
    method: String,

    /// Initial form-encoded body (key=value&key=value) for request-response
    /// mode, sent once at startup.
    #[arg(long)]
    data: Option<String>,

    /// Extra request header as "Name: value"; repeatable.
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Skip TLS certificate verification (verification is on by default).
    #[arg(long)]
    insecure: bool,

    /// Number of independent client sessions.
    #[arg(long, default_value_t = 1)]
    clients: usize,

    /// Delay in milliseconds between admitting consecutive sessions.
    #[arg(long = "stagger-ms", default_value_t = 0)]
    stagger_ms: u64,

    /// Connect timeout in milliseconds.
    #[arg(long = "connect-timeout-ms", default_value_t = 30_000)]
    connect_timeout_ms: u64,

    /// Pool admission policy: fail-fast or sequential.
    #[arg(long, default_value = "fail-fast")]
    admission: String,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// Builds the harness configuration from the parsed arguments.
    fn into_config(self) -> Result<HarnessConfig> {
        let protocol: Protocol = self.protocol.parse()?;
        let method: HttpMethod = self.method.parse()?;
        let admission: AdmissionPolicy = self.admission.parse()?;

        let mut config = HarnessConfig::new(&self.url, protocol)?
            .with_method(method)
            .with_clients(self.clients)
            .with_stagger_delay_ms(self.stagger_ms)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_admission(admission);

        if self.insecure {
            config = config.with_insecure_tls();
        }

        if let Some(data) = self.data {
            config = config.with_body(data);
        }

        for header in self.headers {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                Error::config(format!("Bad header \"{header}\" (expected \"Name: value\")"))
            })?;
            config = config.with_header(name.trim(), value.trim());
        }

        Ok(config)
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Initializes tracing with an env-filter default.
fn init_logging(debug: bool) {
    let default_filter = if debug {
        "wireprobe=debug"
    } else {
        "wireprobe=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(2)
        }
    }
}

/// Wires up input, output, and interrupt handling, then runs the pool.
async fn run(config: HarnessConfig) -> Result<u8> {
    let line_rx = spawn_stdin_reader();
    let (output_tx, mut output_rx) = mpsc::unbounded_channel::<String>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Console printer; sessions never block on it
    let printer = tokio::spawn(async move {
        while let Some(line) = output_rx.recv().await {
            println!("{line}");
        }
    });

    // Ctrl-C drains every session instead of killing the process
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let outcomes = ClientPool::new(config)
        .run(line_rx, output_tx, shutdown_rx)
        .await?;

    let _ = printer.await;

    Ok(exit_code(&outcomes) as u8)
}
