//! # NAT Rule Manager
//!
//! Keeps one port forwarding mapping present or absent on the router.
//!
//! A mapping is identified by its `(external port, internal port,
//! destination IP)` triple, not by rule id: a rule someone else created
//! with the same triple counts as the mapping, and so does a rule whose
//! `enable` flag is off.

use crate::error::Result;
use crate::router::{ForwardingRule, RouterApi, RouterSession};
use tracing::{debug, info};

pub struct NatRuleManager<R> {
    router: R,
    rule_id: String,
}

impl<R: RouterApi> NatRuleManager<R> {
    /// `rule_id` names the rule this agent adds when enabling.
    pub fn new(router: R, rule_id: impl Into<String>) -> Self {
        Self {
            router,
            rule_id: rule_id.into(),
        }
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// The first listed rule carrying the triple, if any.
    pub async fn find_rule(
        &self,
        session: &RouterSession,
        source_port: u16,
        dest_ip: &str,
        dest_port: u16,
    ) -> Result<Option<ForwardingRule>> {
        let rules = self.router.port_forwardings(session).await?;
        Ok(rules
            .into_iter()
            .find(|rule| rule.matches(source_port, dest_ip, dest_port)))
    }

    pub async fn is_enabled(
        &self,
        session: &RouterSession,
        source_port: u16,
        dest_ip: &str,
        dest_port: u16,
    ) -> Result<bool> {
        Ok(self
            .find_rule(session, source_port, dest_ip, dest_port)
            .await?
            .is_some())
    }

    /// Adds the managed rule unless the mapping already exists.
    ///
    /// Returns whether a rule was added.
    pub async fn enable(
        &self,
        session: &RouterSession,
        source_port: u16,
        dest_ip: &str,
        dest_port: u16,
    ) -> Result<bool> {
        if self.is_enabled(session, source_port, dest_ip, dest_port).await? {
            debug!(":{} -> {}:{} already mapped", source_port, dest_ip, dest_port);
            return Ok(false);
        }

        let rule = ForwardingRule::managed(&self.rule_id, source_port, dest_ip, dest_port);
        self.router.add_port_forwarding(session, &rule).await?;
        info!("Added NAT rule {}: :{} -> {}:{}", rule.id, source_port, dest_ip, dest_port);
        Ok(true)
    }

    /// Removes whichever rule carries the mapping; absent is not an error.
    ///
    /// Returns whether a rule was removed.
    pub async fn disable(
        &self,
        session: &RouterSession,
        source_port: u16,
        dest_ip: &str,
        dest_port: u16,
    ) -> Result<bool> {
        let Some(rule) = self.find_rule(session, source_port, dest_ip, dest_port).await? else {
            debug!(":{} -> {}:{} not mapped, nothing to remove", source_port, dest_ip, dest_port);
            return Ok(false);
        };

        self.router
            .remove_port_forwarding(session, &rule.id, &rule.destination_ip)
            .await?;
        info!("Removed NAT rule {}: :{} -> {}:{}", rule.id, source_port, dest_ip, dest_port);
        Ok(true)
    }

    /// Live WAN address; never cached.
    pub async fn public_ip(&self) -> Result<String> {
        self.router.wan_ip().await
    }
}
