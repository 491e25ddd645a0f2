//! # One-shot Commands
//!
//! Operator commands that talk to the router or the identity endpoint
//! directly, without a relay connection. Each opens at most one router
//! session and releases it before returning.

use crate::config::AgentConfig;
use crate::error::Result;
use crate::identity::{IdentityProvider, ServiceAccountIdentity};
use crate::protocol::CommandProtocol;
use crate::router::{ForwardingRule, HttpRouterClient, RouterApi};
use relay_protocol::StatusReport;
use tracing::{info, warn};

fn protocol(config: &AgentConfig) -> Result<CommandProtocol<HttpRouterClient, ServiceAccountIdentity>> {
    let router = HttpRouterClient::from_config(&config.router)?;
    let identity = ServiceAccountIdentity::from_config(&config.identity, config.router.timeout())?;
    Ok(CommandProtocol::new(router, identity, &config.router, config.nat.clone()))
}

/// WAN address and whether the managed mapping exists.
pub async fn status(config: &AgentConfig) -> Result<StatusReport> {
    Ok(protocol(config)?.status_report(None).await)
}

/// Moves the managed mapping to `enable` and reports the resulting state.
pub async fn set_nat(config: &AgentConfig, enable: bool) -> Result<StatusReport> {
    info!("Setting NAT mapping enabled={}", enable);
    Ok(protocol(config)?.status_report(Some(enable)).await)
}

/// The router's WAN address and every forwarding rule it holds.
#[derive(Debug)]
pub struct ForwardingListing {
    pub wan_ip: String,
    pub rules: Vec<ForwardingRule>,
}

pub async fn forwardings(config: &AgentConfig) -> Result<ForwardingListing> {
    list_forwardings(
        &HttpRouterClient::from_config(&config.router)?,
        &config.router.password,
        &config.router.username,
    )
    .await
}

async fn list_forwardings<R: RouterApi>(router: &R, password: &str, username: &str) -> Result<ForwardingListing> {
    let wan_ip = router.wan_ip().await?;
    let session = router.create_session(password, username).await?;
    let rules = router.port_forwardings(&session).await;
    if let Err(e) = router.invalidate_session(session).await {
        warn!("Failed to release router session: {}", e);
    }
    Ok(ForwardingListing { wan_ip, rules: rules? })
}

/// A freshly minted relay bearer token.
pub async fn id_token(config: &AgentConfig) -> Result<String> {
    ServiceAccountIdentity::from_config(&config.identity, config.router.timeout())?
        .bearer_token()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::fake::FakeRouter;

    #[tokio::test]
    async fn listing_releases_session() {
        let router = FakeRouter::new("90.1.2.3")
            .with_rule(ForwardingRule::managed("webui_ssh-raspi", 2222, "192.168.1.20", 22));

        let listing = list_forwardings(&router, "pw", "admin").await.unwrap();
        assert_eq!(listing.wan_ip, "90.1.2.3");
        assert_eq!(listing.rules.len(), 1);
        assert_eq!(router.calls().first().map(String::as_str), Some("getWANStatus"));
        assert_eq!(router.sessions_invalidated(), 1);
        assert_eq!(router.open_sessions(), 0);
    }

    #[tokio::test]
    async fn listing_failure_still_releases_session() {
        let router = FakeRouter::new("90.1.2.3");
        router.fail_on("getPortForwarding");

        assert!(list_forwardings(&router, "pw", "admin").await.is_err());
        assert_eq!(router.sessions_invalidated(), 1);
        assert_eq!(router.open_sessions(), 0);
    }
}
