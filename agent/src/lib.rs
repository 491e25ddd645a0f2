//! # Livebox NAT Agent
//!
//! Keeps a persistent connection to a message relay and turns relay text
//! commands into authenticated calls against a Livebox router: report the
//! WAN address, and add or remove one managed port forwarding rule.
//!
//! ```text
//! Relay ──WS──→ relay ──→ protocol ──→ nat ──→ router ──HTTP──→ Livebox
//!   ↑                         │
//!   └──────── STATUS / PONG ──┘
//! ```

pub mod agent;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod nat;
pub mod protocol;
pub mod relay;
pub mod router;
pub mod state;

pub use agent::run_agent;
pub use config::{load_config, AgentConfig};
pub use error::{AgentError, Result};
