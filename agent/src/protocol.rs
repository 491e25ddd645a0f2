//! # Command Protocol
//!
//! The agent's state machine. One entry point per relay event:
//! - [`CommandProtocol::on_connecting`]: transport dial started
//! - [`CommandProtocol::on_open`]: the bearer frame, before any router traffic
//! - [`CommandProtocol::initial_status`]: the unsolicited first status report
//! - [`CommandProtocol::on_message`]: parse one line, act, maybe reply
//! - [`CommandProtocol::on_error`]: cancellation closes, anything else is fatal
//! - [`CommandProtocol::on_close`]: settle in `Disconnected`
//!
//! Every router session opened while handling a command is released before
//! the reply for that command exists, on success and on failure alike.

use crate::config::{NatMapping, RouterConfig};
use crate::error::{AgentError, Result};
use crate::identity::IdentityProvider;
use crate::nat::NatRuleManager;
use crate::router::{RouterApi, RouterSession};
use crate::state::ConnectionState;
use relay_protocol::{InboundCommand, OutboundMessage, ProtocolError, StatusReport};
use tracing::{debug, error, info, warn};

/// What the transport should do after an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Operator cancelled: close the relay gracefully.
    Close,
    /// Unrecoverable: give up on the connection and exit non-zero.
    Terminate,
}

pub struct CommandProtocol<R, I> {
    state: ConnectionState,
    nat: NatRuleManager<R>,
    identity: I,
    username: String,
    password: String,
    mapping: NatMapping,
}

impl<R: RouterApi, I: IdentityProvider> CommandProtocol<R, I> {
    pub fn new(router: R, identity: I, router_config: &RouterConfig, mapping: NatMapping) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            nat: NatRuleManager::new(router, mapping.rule_id.clone()),
            identity,
            username: router_config.username.clone(),
            password: router_config.password.clone(),
            mapping,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn nat(&self) -> &NatRuleManager<R> {
        &self.nat
    }

    // ─── Transport Events ───────────────────────────────────────

    pub fn on_connecting(&mut self) {
        self.state.advance(ConnectionState::Connecting);
    }

    /// The authentication frame. It goes out as soon as the transport opens,
    /// so it must not wait on the router.
    pub async fn on_open(&mut self) -> Result<OutboundMessage> {
        self.state.advance(ConnectionState::Authenticating);
        info!("Relay connection open, sending authentication");

        let token = self.identity.bearer_token().await?;
        Ok(OutboundMessage::Bearer(token))
    }

    /// Status pushed right after authentication; the protocol is `Ready`
    /// once it has been built.
    pub async fn initial_status(&mut self) -> OutboundMessage {
        let status = self.status_report(None).await;
        self.state.advance(ConnectionState::Ready);
        OutboundMessage::Status(status)
    }

    /// Handles one inbound line; returns the reply, if the command has one.
    /// A line that cannot be understood is logged and gets no reply.
    pub async fn on_message(&mut self, line: &str) -> Option<OutboundMessage> {
        if self.state != ConnectionState::Ready {
            warn!("Dropping relay message received while {}: {:?}", self.state, line);
            return None;
        }

        match self.dispatch(line).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Could not handle message {:?}: {}", line, e);
                None
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> Result<Option<OutboundMessage>> {
        let reply = match InboundCommand::parse(line)? {
            InboundCommand::Ping => {
                debug!("Received ping, replying with pong");
                Some(OutboundMessage::Pong)
            }
            InboundCommand::GetStatus => {
                info!("Replying with status");
                Some(OutboundMessage::Status(self.status_report(None).await))
            }
            InboundCommand::SetNat(desired) => {
                info!("Changing NAT rule if needed, desired enabled={}", desired);
                Some(OutboundMessage::Status(self.status_report(Some(desired)).await))
            }
            InboundCommand::Error(text) => {
                error!("Relay error: {}", text);
                None
            }
            InboundCommand::Info(text) => {
                info!("Relay info: {}", text);
                None
            }
            InboundCommand::Unknown(raw) => {
                return Err(AgentError::Protocol(ProtocolError::UnknownCommand(raw)));
            }
        };
        Ok(reply)
    }

    pub fn on_error(&mut self, err: &AgentError) -> Disposition {
        if err.is_cancellation() {
            info!("Cancel requested (Ctrl+C), closing connection");
            self.state.advance(ConnectionState::Closing);
            Disposition::Close
        } else {
            error!("Relay connection failed: {}", err);
            self.state.advance(ConnectionState::Disconnected);
            Disposition::Terminate
        }
    }

    pub fn on_close(&mut self) {
        info!("Relay connection closed");
        self.state.advance(ConnectionState::Disconnected);
    }

    // ─── Status ─────────────────────────────────────────────────

    /// Builds a status report, applying `desired` first when given.
    ///
    /// Best effort: a failed NAT lookup reports `false` and a failed WAN
    /// query reports an empty address, so the relay always gets a reply.
    pub async fn status_report(&self, desired: Option<bool>) -> StatusReport {
        let nat_enabled = match self.nat_state(desired).await {
            Ok(enabled) => enabled,
            Err(e) => {
                error!("Failed to read NAT state: {}", e);
                false
            }
        };
        let ip_addr = match self.nat.public_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                error!("Failed to read WAN address: {}", e);
                String::new()
            }
        };
        StatusReport::new(ip_addr, nat_enabled)
    }

    /// Opens a session, reconciles, and always releases the session before
    /// returning.
    async fn nat_state(&self, desired: Option<bool>) -> Result<bool> {
        let router = self.nat.router();
        let session = router.create_session(&self.password, &self.username).await?;

        let outcome = self.reconcile(&session, desired).await;

        match router.invalidate_session(session).await {
            Ok(true) => {}
            Ok(false) => warn!("Router did not report a clean session release"),
            Err(e) => warn!("Failed to release router session: {}", e),
        }
        outcome
    }

    /// Current mapping state, after moving it towards `desired`.
    ///
    /// The answer is re-read from the router after any change so the reply
    /// shows what actually happened, including a change that failed.
    async fn reconcile(&self, session: &RouterSession, desired: Option<bool>) -> Result<bool> {
        let m = &self.mapping;
        let current = self
            .nat
            .is_enabled(session, m.source_port, &m.target_ip, m.target_port)
            .await?;

        let Some(desired) = desired else {
            return Ok(current);
        };
        if current == desired {
            return Ok(current);
        }

        let applied = if desired {
            self.nat
                .enable(session, m.source_port, &m.target_ip, m.target_port)
                .await
        } else {
            self.nat
                .disable(session, m.source_port, &m.target_ip, m.target_port)
                .await
        };
        if let Err(e) = applied {
            error!("Failed to apply NAT change: {}", e);
        }

        self.nat
            .is_enabled(session, m.source_port, &m.target_ip, m.target_port)
            .await
    }
}
