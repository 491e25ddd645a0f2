//! # Connection State
//!
//! Lifecycle of the single relay connection:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Ready → Closing → Disconnected
//! ```
//!
//! Any state may drop straight back to `Disconnected` when the transport
//! fails or the peer closes.

use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Closing,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` follows the lifecycle.
    pub fn can_transition(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Authenticating)
                | (Authenticating, Ready)
                | (Connecting | Authenticating | Ready, Closing)
                | (_, Disconnected)
        )
    }

    /// Moves to `next`, logging out-of-order transitions instead of refusing
    /// them: the transport decides what happens, this only records it.
    pub fn advance(&mut self, next: ConnectionState) {
        if !self.can_transition(next) {
            warn!("Unexpected connection transition {} -> {}", self, next);
        } else {
            debug!("Connection {} -> {}", self, next);
        }
        *self = next;
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}
