//! # Relay Command Protocol
//!
//! Defines the line-oriented text messages exchanged between the agent and
//! the relay. Every relay frame carries exactly one line:
//!
//! ```text
//! in   PING                  liveness probe
//! out  PONG                  liveness reply
//! in   GET status            request current status
//! in   SET nat-ssh <json>    request desired NAT-enabled boolean
//! out  STATUS <json>         {"ip_addr": "...", "ssh_nat_enable": bool}
//! in   ERROR <text>          logged only
//! in   INFO <text>           logged only
//! out  Bearer <token>        authentication frame, once per connection
//! ```
//!
//! This crate only parses and formats; it performs no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ─── Literals ────────────────────────────────────────────────────

pub const PING_COMMAND: &str = "PING";
pub const PONG_COMMAND: &str = "PONG";
pub const GET_STATUS_COMMAND: &str = "GET status";
pub const SET_NAT_SSH_PREFIX: &str = "SET nat-ssh ";
pub const ERROR_PREFIX: &str = "ERROR ";
pub const INFO_PREFIX: &str = "INFO ";
pub const STATUS_PREFIX: &str = "STATUS ";
pub const BEARER_PREFIX: &str = "Bearer ";

// ─── Errors ──────────────────────────────────────────────────────

/// A relay line that looked like a command but could not be decoded.
///
/// Never fatal: the agent logs it and keeps the connection open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// `SET nat-ssh` carried something other than a JSON boolean.
    #[error("invalid payload for {command:?}: {reason}")]
    InvalidPayload { command: &'static str, reason: String },

    /// A `STATUS` line whose JSON body did not decode.
    #[error("malformed status line: {0}")]
    MalformedStatus(String),

    /// Any line the agent has no handler for.
    #[error("unrecognized command: {0:?}")]
    UnknownCommand(String),
}

// ─── Status Report ───────────────────────────────────────────────

/// WAN address plus whether the managed NAT mapping exists.
///
/// A plain value, recomputed on every status request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub ip_addr: String,
    pub ssh_nat_enable: bool,
}

impl StatusReport {
    pub fn new(ip_addr: impl Into<String>, ssh_nat_enable: bool) -> Self {
        Self {
            ip_addr: ip_addr.into(),
            ssh_nat_enable,
        }
    }

    /// Parses a full `STATUS <json>` line back into a report.
    pub fn from_status_line(line: &str) -> Result<Self, ProtocolError> {
        let body = trim_line(line)
            .strip_prefix(STATUS_PREFIX)
            .ok_or_else(|| ProtocolError::MalformedStatus(format!("missing prefix in {line:?}")))?;
        serde_json::from_str(body).map_err(|e| ProtocolError::MalformedStatus(e.to_string()))
    }
}

// ─── Inbound ─────────────────────────────────────────────────────

/// One inbound relay line, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    Ping,
    GetStatus,
    /// Desired state of the managed NAT mapping.
    SetNat(bool),
    Error(String),
    Info(String),
    /// Anything not recognized, kept verbatim for logging.
    Unknown(String),
}

impl InboundCommand {
    /// Decodes a single relay line.
    ///
    /// Unrecognized input is `Ok(Unknown(..))`; only a recognized command
    /// with an undecodable body is an error.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = trim_line(line);

        if line == PING_COMMAND {
            return Ok(Self::Ping);
        }
        if line == GET_STATUS_COMMAND {
            return Ok(Self::GetStatus);
        }
        if let Some(body) = line.strip_prefix(SET_NAT_SSH_PREFIX) {
            let value: bool =
                serde_json::from_str(body.trim()).map_err(|e| ProtocolError::InvalidPayload {
                    command: "SET nat-ssh",
                    reason: e.to_string(),
                })?;
            return Ok(Self::SetNat(value));
        }
        if let Some(text) = line.strip_prefix(ERROR_PREFIX) {
            return Ok(Self::Error(text.to_string()));
        }
        if let Some(text) = line.strip_prefix(INFO_PREFIX) {
            return Ok(Self::Info(text.to_string()));
        }

        Ok(Self::Unknown(line.to_string()))
    }
}

fn trim_line(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

// ─── Outbound ────────────────────────────────────────────────────

/// Everything the agent ever writes to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Pong,
    Status(StatusReport),
    /// Authentication frame; must be the first frame of a connection.
    Bearer(String),
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundMessage::Pong => f.write_str(PONG_COMMAND),
            OutboundMessage::Status(report) => {
                let json = serde_json::to_string(report).map_err(|_| fmt::Error)?;
                write!(f, "{STATUS_PREFIX}{json}")
            }
            OutboundMessage::Bearer(token) => write!(f, "{BEARER_PREFIX}{token}"),
        }
    }
}
