//! # Agent Connection Loop
//!
//! Owns the single relay connection for the life of the process:
//! - Dial the relay and hand the open event to the [`CommandProtocol`]
//! - Feed every inbound line through the protocol, one at a time, and
//!   write back its reply before reading the next line
//! - Turn Ctrl+C into a graceful close
//!
//! There is no reconnect: when the relay goes away the loop ends and the
//! process supervisor decides what happens next.

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::identity::{IdentityProvider, ServiceAccountIdentity};
use crate::protocol::{CommandProtocol, Disposition};
use crate::relay::{RelayConnection, RelayEvent};
use crate::router::{HttpRouterClient, RouterApi};
use std::future::Future;
use tracing::{error, info};

/// Runs the agent until the relay closes (`Ok`) or fails (`Err`).
pub async fn run_agent(config: AgentConfig) -> Result<()> {
    config.validate()?;
    let router = HttpRouterClient::from_config(&config.router)?;
    let identity = ServiceAccountIdentity::from_config(&config.identity, config.router.timeout())?;
    let mut protocol = CommandProtocol::new(router, identity, &config.router, config.nat.clone());

    serve(&mut protocol, &config.relay.url, shutdown_signal()).await
}

/// Resolves on Ctrl+C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Dials `url` and drives the connection. `shutdown` is honoured while
/// dialing as well.
pub async fn serve<R, I, S>(protocol: &mut CommandProtocol<R, I>, url: &str, shutdown: S) -> Result<()>
where
    R: RouterApi,
    I: IdentityProvider,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    protocol.on_connecting();
    info!("Connecting to relay: {}", url);
    let dialed = tokio::select! {
        conn = RelayConnection::connect(url) => conn,
        _ = &mut shutdown => Err(AgentError::cancelled()),
    };
    let mut conn = match dialed {
        Ok(conn) => conn,
        Err(e) => {
            return match protocol.on_error(&e) {
                Disposition::Close => {
                    protocol.on_close();
                    Ok(())
                }
                Disposition::Terminate => Err(e),
            };
        }
    };

    drive(protocol, &mut conn, shutdown).await
}

/// Pumps events from an open relay connection into the protocol until the
/// connection ends. `shutdown` resolving counts as an operator cancel.
pub async fn drive<R, I, S>(
    protocol: &mut CommandProtocol<R, I>,
    conn: &mut RelayConnection,
    shutdown: S,
) -> Result<()>
where
    R: RouterApi,
    I: IdentityProvider,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    // ── Authentication ──
    let bearer = tokio::select! {
        bearer = protocol.on_open() => bearer,
        _ = &mut shutdown => Err(AgentError::cancelled()),
    };
    let sent = match bearer {
        Ok(bearer) => conn.send(&bearer).await,
        Err(e) => Err(e),
    };
    if let Err(e) = sent {
        return finish(protocol, conn, e).await;
    }

    // ── Initial status ──
    let status = tokio::select! {
        status = protocol.initial_status() => Ok(status),
        _ = &mut shutdown => Err(AgentError::cancelled()),
    };
    let sent = match status {
        Ok(status) => conn.send(&status).await,
        Err(e) => Err(e),
    };
    if let Err(e) = sent {
        return finish(protocol, conn, e).await;
    }

    // ── Inbound loop ──
    loop {
        let event = tokio::select! {
            event = conn.next_event() => event,
            _ = &mut shutdown => RelayEvent::Error(AgentError::cancelled()),
        };

        match event {
            RelayEvent::Message(line) => {
                let handled = tokio::select! {
                    reply = protocol.on_message(&line) => Ok(reply),
                    _ = &mut shutdown => Err(AgentError::cancelled()),
                };
                let reply = match handled {
                    Ok(reply) => reply,
                    Err(e) => return finish(protocol, conn, e).await,
                };
                if let Some(reply) = reply {
                    if let Err(e) = conn.send(&reply).await {
                        return finish(protocol, conn, e).await;
                    }
                }
            }
            RelayEvent::Closed => {
                protocol.on_close();
                return Ok(());
            }
            RelayEvent::Error(e) => return finish(protocol, conn, e).await,
        }
    }
}

async fn finish<R, I>(
    protocol: &mut CommandProtocol<R, I>,
    conn: &mut RelayConnection,
    err: AgentError,
) -> Result<()>
where
    R: RouterApi,
    I: IdentityProvider,
{
    match protocol.on_error(&err) {
        Disposition::Close => {
            conn.close().await;
            protocol.on_close();
            Ok(())
        }
        Disposition::Terminate => Err(err),
    }
}
