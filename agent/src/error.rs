//! # Agent Errors
//!
//! One error type for everything below `main`:
//! - **Auth**: the router refused a session create/release at the HTTP level
//! - **Rpc**: the router answered, but its own envelope reports failure
//! - **Protocol**: a relay line could not be understood (never fatal)
//! - **Transport**: the relay connection failed or was cancelled
//! - **Timeout**: a router call or token exchange exceeded its bounded wait
//! - **Identity**: the bearer token could not be minted
//! - **Config**: configuration missing or invalid

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = AgentError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("router authentication failed: HTTP {status} on {method}")]
    Auth { method: &'static str, status: u16 },

    #[error("router call {service}.{method} failed: {reason}")]
    Rpc {
        service: String,
        method: String,
        reason: String,
    },

    #[error(transparent)]
    Protocol(#[from] relay_protocol::ProtocolError),

    #[error("relay transport error: {reason}")]
    Transport { reason: String, cancelled: bool },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("identity token error: {0}")]
    Identity(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AgentError {
    pub fn rpc(service: &str, method: &str, reason: impl Into<String>) -> Self {
        Self::Rpc {
            service: service.to_string(),
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transport<E: ToString>(reason: E) -> Self {
        Self::Transport {
            reason: reason.to_string(),
            cancelled: false,
        }
    }

    /// Operator-initiated close (Ctrl+C).
    pub fn cancelled() -> Self {
        Self::Transport {
            reason: "cancel requested".to_string(),
            cancelled: true,
        }
    }

    /// True only for the operator-initiated close, which ends the
    /// connection gracefully instead of terminating the process.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Transport { cancelled: true, .. })
    }
}

impl From<jsonwebtoken::errors::Error> for AgentError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::Identity(e.to_string())
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
