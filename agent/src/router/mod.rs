//! # Router RPC
//!
//! The router exposes a single JSON-RPC-like endpoint. Every operation is a
//! `{service, method, parameters}` call; the ones that touch firewall state
//! need an authenticated [`RouterSession`].
//!
//! [`RouterApi`] is the seam: the three contract methods are implemented
//! per transport ([`HttpRouterClient`] for the real router), and the domain
//! operations are provided on top of [`RouterApi::call`].

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod forwarding;
mod session;

pub use client::HttpRouterClient;
pub use forwarding::{ForwardingRule, PROTOCOL_TCP};
pub use session::{RouterSession, RpcResult};

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[async_trait]
pub trait RouterApi: Send + Sync {
    /// Opens an authenticated context.
    ///
    /// Fails with [`AgentError::Auth`] on a non-success HTTP status.
    async fn create_session(&self, password: &str, username: &str) -> Result<RouterSession>;

    /// Releases a context; `Ok(true)` iff the router reports status code 0.
    ///
    /// Fails with [`AgentError::Auth`] on a non-success HTTP status.
    async fn invalidate_session(&self, session: RouterSession) -> Result<bool>;

    /// Generic RPC. `None` sends the call unauthenticated.
    async fn call(
        &self,
        session: Option<&RouterSession>,
        service: &str,
        method: &str,
        parameters: Value,
    ) -> Result<RpcResult>;

    // ─── Domain Operations ──────────────────────────────────────

    /// Current WAN address. Unauthenticated, never cached.
    async fn wan_ip(&self) -> Result<String> {
        let result = self.call(None, "NMC", "getWANStatus", json!({})).await?;
        result
            .data
            .get("IPAddress")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::rpc("NMC", "getWANStatus", "missing data.IPAddress"))
    }

    async fn port_forwardings(&self, session: &RouterSession) -> Result<Vec<ForwardingRule>> {
        let result = self
            .call(
                Some(session),
                "Firewall",
                "getPortForwarding",
                forwarding::origin_parameters(),
            )
            .await?;
        ForwardingRule::from_listing(result.status)
            .map_err(|e| AgentError::rpc("Firewall", "getPortForwarding", e.to_string()))
    }

    async fn add_port_forwarding(&self, session: &RouterSession, rule: &ForwardingRule) -> Result<()> {
        let result = self
            .call(
                Some(session),
                "Firewall",
                "setPortForwarding",
                rule.to_parameters(),
            )
            .await?;
        if !result.succeeded() {
            return Err(AgentError::rpc(
                "Firewall",
                "setPortForwarding",
                format!("router refused rule {}", rule.id),
            ));
        }
        Ok(())
    }

    async fn remove_port_forwarding(&self, session: &RouterSession, id: &str, dest_ip: &str) -> Result<()> {
        let result = self
            .call(
                Some(session),
                "Firewall",
                "deletePortForwarding",
                forwarding::removal_parameters(id, dest_ip),
            )
            .await?;
        if !result.succeeded() {
            return Err(AgentError::rpc(
                "Firewall",
                "deletePortForwarding",
                format!("router refused to remove rule {id}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: RouterApi + ?Sized> RouterApi for Arc<T> {
    async fn create_session(&self, password: &str, username: &str) -> Result<RouterSession> {
        (**self).create_session(password, username).await
    }

    async fn invalidate_session(&self, session: RouterSession) -> Result<bool> {
        (**self).invalidate_session(session).await
    }

    async fn call(
        &self,
        session: Option<&RouterSession>,
        service: &str,
        method: &str,
        parameters: Value,
    ) -> Result<RpcResult> {
        (**self).call(session, service, method, parameters).await
    }
}
