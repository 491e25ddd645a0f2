//! # Agent Configuration
//!
//! Loaded once at process start from a JSON file:
//!
//! ```json
//! {
//!   "relay":    { "url": "wss://relay.example.com/agent" },
//!   "identity": { "service_account_file": "sa.json", "audience": "https://relay.example.com" },
//!   "router":   { "address": "192.168.1.1", "password": "secret" },
//!   "nat":      { "source_port": 2222, "target_ip": "192.168.1.20", "target_port": 22 }
//! }
//! ```
//!
//! The router password can also come from `LIVEBOX_AGENT_ROUTER_PASSWORD`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable overriding `router.password`.
pub const PASSWORD_ENV: &str = "LIVEBOX_AGENT_ROUTER_PASSWORD";

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_ROUTER_ADDRESS: &str = "192.168.1.1";
pub const DEFAULT_ROUTER_USERNAME: &str = "admin";
pub const DEFAULT_RULE_ID: &str = "webui_ssh-raspi";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

// ─── Sections ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub relay: RelayConfig,
    pub identity: IdentityConfig,
    pub router: RouterConfig,
    pub nat: NatMapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay WebSocket URL (`ws://` or `wss://`).
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to the service-account JSON key.
    pub service_account_file: PathBuf,
    /// Audience the minted identity token is issued for.
    pub audience: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_router_address")]
    pub address: String,
    #[serde(default = "default_router_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Upper bound on every router call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RouterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The one forwarding rule this agent manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatMapping {
    /// External (WAN-side) port.
    pub source_port: u16,
    /// LAN host receiving the forwarded traffic.
    pub target_ip: String,
    /// Internal port on `target_ip`.
    pub target_port: u16,
    #[serde(default = "default_rule_id")]
    pub rule_id: String,
}

fn default_router_address() -> String {
    DEFAULT_ROUTER_ADDRESS.to_string()
}

fn default_router_username() -> String {
    DEFAULT_ROUTER_USERNAME.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_rule_id() -> String {
    DEFAULT_RULE_ID.to_string()
}

// ─── Validation ─────────────────────────────────────────────────

impl AgentConfig {
    /// Checks every field the agent cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.password.is_empty() {
            return Err(ConfigError::Invalid {
                field: "router.password",
                reason: format!("empty (set it in the file or via {PASSWORD_ENV})"),
            });
        }
        if self.router.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "router.timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }

        let url = url::Url::parse(&self.relay.url).map_err(|e| ConfigError::Invalid {
            field: "relay.url",
            reason: e.to_string(),
        })?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ConfigError::Invalid {
                field: "relay.url",
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        if self.identity.audience.is_empty() {
            return Err(ConfigError::Invalid {
                field: "identity.audience",
                reason: "empty".into(),
            });
        }

        if self.nat.source_port == 0 || self.nat.target_port == 0 {
            return Err(ConfigError::Invalid {
                field: "nat",
                reason: "ports must be non-zero".into(),
            });
        }
        self.nat
            .target_ip
            .parse::<Ipv4Addr>()
            .map_err(|e| ConfigError::Invalid {
                field: "nat.target_ip",
                reason: format!("{:?}: {e}", self.nat.target_ip),
            })?;

        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            debug!("Router password taken from {}", PASSWORD_ENV);
            self.router.password = password;
        }
    }
}

// ─── Loading ────────────────────────────────────────────────────

/// Loads, applies environment overrides to, and validates the config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<AgentConfig, ConfigError> {
    let path = path.as_ref();
    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let mut config = parse(&contents)?;
    config.apply_env();
    config.validate()?;

    info!(
        "Configuration loaded: relay={}, router={}, mapping :{} -> {}:{}",
        config.relay.url,
        config.router.address,
        config.nat.source_port,
        config.nat.target_ip,
        config.nat.target_port
    );
    Ok(config)
}

/// Parses and validates a configuration from a JSON string, without
/// environment overrides.
pub fn load_config_str(json: &str) -> Result<AgentConfig, ConfigError> {
    let config = parse(json)?;
    config.validate()?;
    Ok(config)
}

fn parse(json: &str) -> Result<AgentConfig, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
}
