//! Interactive harness: per-session driver, multi-client pool, stdin routing.
//!
//! The harness contains no protocol logic. It drives whatever
//! [`crate::adapter::SessionLink`] an adapter hands back, relays operator
//! lines as outbound messages, renders inbound events as they arrive, and
//! owns the graceful-shutdown story.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `driver` | One session's state machine and I/O loop |
//! | `pool` | Fan-out of N independent sessions |
//! | `input` | Stdin reader and per-client line routing |

// ============================================================================
// Submodules
// ============================================================================

/// Per-session interactive driver.
pub mod driver;

/// Stdin reader and line routing.
pub mod input;

/// Multi-client fan-out pool.
pub mod pool;

// ============================================================================
// Re-exports
// ============================================================================

pub use driver::{DriverHandles, DriverOutcome, DriverState, HarnessDriver};
pub use pool::{ClientPool, exit_code};

// ============================================================================
// Sentinel
// ============================================================================

/// The reserved input value that triggers graceful termination.
pub const EXIT_SENTINEL: &str = "exit";

/// Returns `true` if an operator line is the termination sentinel.
///
/// Case-insensitive; surrounding whitespace is ignored.
#[inline]
#[must_use]
pub fn is_exit_sentinel(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(EXIT_SENTINEL)
}

// ============================================================================
// Tests
// ============================================================================
