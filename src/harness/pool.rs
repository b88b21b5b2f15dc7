//! Multi-client fan-out pool.
//!
//! Spawns N fully independent harness drivers, each with its own session,
//! input channel, and pool index. Sessions share nothing: one session
//! failing, closing, or never connecting leaves every other session's
//! lifecycle untouched. The pool's run completes only when every session has
//! terminated.
//!
//! Admission is an explicit policy rather than an inferred behavior: the
//! stagger delay spaces out connect attempts in either mode, and
//! `Sequential` additionally holds the next spawn until the previous
//! session's connect attempt has resolved.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapter::{ConnectOptions, ProtocolAdapter, adapter_for};
use crate::config::{AdmissionPolicy, HarnessConfig, Protocol};
use crate::endpoint::Endpoint;
use crate::error::Result;

use super::driver::{DriverHandles, DriverOutcome, HarnessDriver};
use super::input::route_lines;

// ============================================================================
// ClientPool
// ============================================================================

/// A set of independently-lived sessions launched together.
pub struct ClientPool {
    config: HarnessConfig,
    adapter: Arc<dyn ProtocolAdapter>,
}

impl ClientPool {
    /// Creates a pool with the adapter selected by the configuration.
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        let adapter = adapter_for(config.protocol);
        Self { config, adapter }
    }

    /// Creates a pool with an explicit adapter.
    #[must_use]
    pub fn with_adapter(config: HarnessConfig, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        Self { config, adapter }
    }

    /// Runs every session to termination.
    ///
    /// `line_rx` carries operator input for the whole pool; rendered output
    /// lands on `output_tx`; flipping `shutdown_rx` to `true` drains every
    /// session gracefully.
    ///
    /// Returns one outcome per session, ordered by pool index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedScheme`] if the endpoint URL does
    /// not match the configured protocol. Individual session failures are
    /// not errors; they are reported in the outcomes.
    pub async fn run(
        self,
        line_rx: mpsc::UnboundedReceiver<String>,
        output_tx: mpsc::UnboundedSender<String>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Vec<DriverOutcome>> {
        let endpoint = Endpoint::new(self.config.endpoint_url.clone(), self.config.protocol)?;
        let options = ConnectOptions::from_config(&self.config);

        let count = self.config.client_count;
        let multi = count > 1;

        info!(
            endpoint = %endpoint,
            clients = count,
            admission = %self.config.admission,
            "Starting pool"
        );

        let mut session_inputs: FxHashMap<usize, mpsc::UnboundedSender<String>> =
            FxHashMap::default();
        let mut join_set: JoinSet<DriverOutcome> = JoinSet::new();

        for index in 0..count {
            if index > 0 && !self.config.stagger_delay.is_zero() {
                tokio::time::sleep(self.config.stagger_delay).await;
            }

            let (input_tx, input_rx) = mpsc::unbounded_channel();
            session_inputs.insert(index, input_tx);

            let mut driver = HarnessDriver::new(
                endpoint.clone(),
                Arc::clone(&self.adapter),
                options.clone(),
                DriverHandles {
                    input_rx,
                    output_tx: output_tx.clone(),
                    shutdown_rx: shutdown_rx.clone(),
                },
            );

            if multi {
                driver = driver.with_index(index);
            }

            if self.config.protocol == Protocol::RequestResponse
                && let Some(body) = &self.config.body
            {
                driver = driver.with_initial_body(body.clone());
            }

            let admit_rx = match self.config.admission {
                AdmissionPolicy::Sequential => {
                    let (admit_tx, admit_rx) = oneshot::channel();
                    driver = driver.with_admission_signal(admit_tx);
                    Some(admit_rx)
                }
                AdmissionPolicy::FailFast => None,
            };

            join_set.spawn(driver.run());

            if let Some(admit_rx) = admit_rx {
                match admit_rx.await {
                    Ok(connected) => {
                        debug!(index, connected, "Connect attempt resolved");
                    }
                    Err(_) => warn!(index, "Session ended before admission signal"),
                }
            }
        }

        let router = tokio::spawn(route_lines(line_rx, session_inputs, multi));

        let mut outcomes: FxHashMap<usize, DriverOutcome> = FxHashMap::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    debug!(
                        index = outcome.index,
                        sent = outcome.sent,
                        received = outcome.received,
                        connect_failed = outcome.connect_failed,
                        "Session terminated"
                    );
                    outcomes.insert(outcome.index, outcome);
                }
                Err(e) => warn!(error = %e, "Session task failed"),
            }
        }

        router.abort();
        info!(sessions = outcomes.len(), "Pool finished");

        let mut outcomes: Vec<DriverOutcome> = outcomes.into_values().collect();
        outcomes.sort_by_key(|outcome| outcome.index);
        Ok(outcomes)
    }
}

// ============================================================================
// Exit Code
// ============================================================================

/// Maps pool outcomes to a process exit code.
///
/// Zero on clean termination of all sessions; non-zero when any session
/// terminated on a connect-phase failure before exchanging a message.
#[must_use]
pub fn exit_code(outcomes: &[DriverOutcome]) -> i32 {
    let connect_failures = outcomes
        .iter()
        .filter(|outcome| outcome.connect_failed)
        .count();

    i32::from(connect_failures > 0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::adapter::mock::MockAdapter;
    use crate::config::Protocol;

    fn pool_config(clients: usize) -> HarnessConfig {
        HarnessConfig::new("ws://mock.test:9/", Protocol::Duplex)
            .expect("config")
            .with_clients(clients)
            .with_admission(AdmissionPolicy::Sequential)
    }

    async fn drain_output(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_pool_runs_all_sessions_to_termination() {
        let adapter = MockAdapter::new();
        let log = Arc::clone(&adapter.log);
        let pool = ClientPool::with_adapter(pool_config(3), Arc::new(adapter));

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        line_tx.send("hello".to_string()).expect("send");
        line_tx.send("exit".to_string()).expect("send");

        let outcomes = pool
            .run(line_rx, output_tx, shutdown_rx)
            .await
            .expect("pool run");

        assert_eq!(outcomes.len(), 3);
        for (index, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.index, index);
            assert!(!outcome.connect_failed);
            assert_eq!(outcome.sent, 1);
        }
        assert_eq!(log.closes.load(Ordering::SeqCst), 3);

        let lines = drain_output(&mut output_rx).await;
        assert!(lines.contains(&"[client 0] Received: echo hello".to_string()));
        assert!(lines.contains(&"[client 2] Connection closed".to_string()));
    }

    #[tokio::test]
    async fn test_one_failed_connect_leaves_others_unaffected() {
        let adapter = MockAdapter::failing_first(1);
        let log = Arc::clone(&adapter.log);
        let pool = ClientPool::with_adapter(pool_config(3), Arc::new(adapter));

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (output_tx, _output_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        line_tx.send("ping".to_string()).expect("send");
        line_tx.send("exit".to_string()).expect("send");

        let outcomes = pool
            .run(line_rx, output_tx, shutdown_rx)
            .await
            .expect("pool run");

        assert_eq!(outcomes.len(), 3);

        // Sequential admission makes connect order deterministic
        assert!(outcomes[0].connect_failed);
        assert_eq!(outcomes[0].sent, 0);

        for outcome in &outcomes[1..] {
            assert!(!outcome.connect_failed);
            assert_eq!(outcome.sent, 1);
            assert_eq!(outcome.received, 1);
        }

        // Only the two surviving sessions ever closed
        assert_eq!(log.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_targeted_line_reaches_one_session() {
        let adapter = MockAdapter::new();
        let log = Arc::clone(&adapter.log);
        let pool = ClientPool::with_adapter(pool_config(2), Arc::new(adapter));

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (output_tx, _output_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        line_tx.send("1: just you".to_string()).expect("send");
        line_tx.send("exit".to_string()).expect("send");

        let outcomes = pool
            .run(line_rx, output_tx, shutdown_rx)
            .await
            .expect("pool run");

        assert_eq!(outcomes[0].sent, 0);
        assert_eq!(outcomes[1].sent, 1);
        assert_eq!(*log.sent.lock(), vec!["just you"]);
    }

    #[tokio::test]
    async fn test_interrupt_drains_whole_pool() {
        let adapter = MockAdapter::new();
        let log = Arc::clone(&adapter.log);
        let pool = ClientPool::with_adapter(pool_config(3), Arc::new(adapter));

        let (_line_tx, line_rx) = mpsc::unbounded_channel();
        let (output_tx, _output_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = shutdown_tx.send(true);
        });

        let outcomes = pool
            .run(line_rx, output_tx, shutdown_rx)
            .await
            .expect("pool run");

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|outcome| !outcome.connect_failed));
        assert_eq!(log.closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exit_code_clean() {
        let outcomes = vec![
            DriverOutcome {
                index: 0,
                connect_failed: false,
                sent: 2,
                received: 2,
            },
            DriverOutcome {
                index: 1,
                connect_failed: false,
                sent: 0,
                received: 0,
            },
        ];
        assert_eq!(exit_code(&outcomes), 0);
    }

    #[test]
    fn test_exit_code_connect_failure() {
        let outcomes = vec![DriverOutcome {
            index: 0,
            connect_failed: true,
            sent: 0,
            received: 0,
        }];
        assert_eq!(exit_code(&outcomes), 1);
    }

    #[test]
    fn test_exit_code_empty() {
        assert_eq!(exit_code(&[]), 0);
    }
}
