//! Operator input: stdin reader and per-client routing.
//!
//! One task reads stdin for the whole process; the pool routes each line to
//! its sessions. In a multi-client run an `N: text` prefix targets client N,
//! and anything else (the `exit` sentinel included) broadcasts to every live
//! session. A single-client run takes lines verbatim, prefix or not.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

// ============================================================================
// Stdin Reader
// ============================================================================

/// Spawns the stdin reader task and returns its line channel.
///
/// The task ends when stdin reaches EOF or every receiver is gone.
#[must_use]
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (line_tx, line_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
        debug!("Stdin reader finished");
    });

    line_rx
}

// ============================================================================
// Routing
// ============================================================================

/// Splits an optional `N:` routing prefix off an operator line.
///
/// Returns the target client index (when the prefix parses as one) and the
/// remaining payload.
#[must_use]
pub(crate) fn parse_target(line: &str) -> (Option<usize>, &str) {
    if let Some((head, rest)) = line.split_once(':')
        && let Ok(index) = head.trim().parse::<usize>()
    {
        return (Some(index), rest.trim_start());
    }
    (None, line)
}

/// Routes operator lines to per-session channels until no session is left.
///
/// A send failure means that session terminated; its channel is dropped from
/// the table. Prefix routing only applies to multi-client runs.
pub(crate) async fn route_lines(
    mut line_rx: mpsc::UnboundedReceiver<String>,
    mut sessions: FxHashMap<usize, mpsc::UnboundedSender<String>>,
    multi: bool,
) {
    while let Some(line) = line_rx.recv().await {
        let (target, payload) = if multi {
            parse_target(&line)
        } else {
            (None, line.as_str())
        };

        match target {
            Some(index) => match sessions.get(&index) {
                Some(session_tx) => {
                    if session_tx.send(payload.to_string()).is_err() {
                        sessions.remove(&index);
                    }
                }
                None => warn!(index, "No such client"),
            },
            None => {
                sessions.retain(|_, session_tx| session_tx.send(payload.to_string()).is_ok());
            }
        }

        if sessions.is_empty() {
            break;
        }
    }

    debug!("Input router finished");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_with_prefix() {
        assert_eq!(parse_target("3: hello"), (Some(3), "hello"));
        assert_eq!(parse_target("0:exit"), (Some(0), "exit"));
        assert_eq!(parse_target(" 12 : spaced"), (Some(12), "spaced"));
    }

    #[test]
    fn test_parse_target_without_prefix() {
        assert_eq!(parse_target("hello"), (None, "hello"));
        assert_eq!(parse_target("exit"), (None, "exit"));
        // A non-numeric head is payload, not routing
        assert_eq!(parse_target("key: value"), (None, "key: value"));
    }

    #[tokio::test]
    async fn test_route_broadcast_and_targeted() {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (tx0, mut rx0) = mpsc::unbounded_channel();
        let (tx1, mut rx1) = mpsc::unbounded_channel();

        let mut sessions = FxHashMap::default();
        sessions.insert(0, tx0);
        sessions.insert(1, tx1);

        let router = tokio::spawn(route_lines(line_rx, sessions, true));

        line_tx.send("both".to_string()).expect("send");
        line_tx.send("1: only one".to_string()).expect("send");
        drop(line_tx);
        router.await.expect("router");

        assert_eq!(rx0.recv().await, Some("both".to_string()));
        assert!(rx0.try_recv().is_err());

        assert_eq!(rx1.recv().await, Some("both".to_string()));
        assert_eq!(rx1.recv().await, Some("only one".to_string()));
    }

    #[tokio::test]
    async fn test_route_single_client_keeps_prefix_text() {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (tx0, mut rx0) = mpsc::unbounded_channel();

        let mut sessions = FxHashMap::default();
        sessions.insert(0, tx0);

        let router = tokio::spawn(route_lines(line_rx, sessions, false));

        line_tx.send("5: looks routed".to_string()).expect("send");
        drop(line_tx);
        router.await.expect("router");

        assert_eq!(rx0.recv().await, Some("5: looks routed".to_string()));
    }

    #[tokio::test]
    async fn test_route_drops_dead_sessions() {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (tx0, rx0) = mpsc::unbounded_channel::<String>();
        drop(rx0);

        let mut sessions = FxHashMap::default();
        sessions.insert(0, tx0);

        let router = tokio::spawn(route_lines(line_rx, sessions, true));

        // The only session is dead; the router notices and exits
        line_tx.send("anyone there".to_string()).expect("send");
        router.await.expect("router");
    }
}
