use agent_lib::config::DEFAULT_CONFIG_PATH;
use agent_lib::{commands, load_config, run_agent};
use anyhow::Context;
use clap::{Parser, Subcommand};
use relay_protocol::OutboundMessage;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "livebox-agent", version, about = "Relay-driven Livebox NAT agent")]
struct Cli {
    /// Configuration file (JSON).
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `agent_lib=trace`; overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the relay and serve commands (default).
    Run,
    /// Print the current WAN address and NAT state.
    Status,
    /// List every port forwarding rule on the router.
    Forwardings,
    /// Enable or disable the managed NAT mapping.
    Nat {
        #[command(subcommand)]
        action: NatAction,
    },
    /// Mint and print a relay bearer token.
    IdToken,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum NatAction {
    Enable,
    Disable,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "livebox_agent=info,agent_lib=info".into()),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting agent");
            run_agent(config).await.context("relay connection failed")?;
        }
        Command::Status => {
            let report = commands::status(&config).await?;
            println!("{}", OutboundMessage::Status(report));
        }
        Command::Forwardings => {
            let listing = commands::forwardings(&config).await?;
            println!("WAN IP: {}", listing.wan_ip);
            println!("Port forwardings:");
            for rule in listing.rules {
                println!("{rule}");
            }
        }
        Command::Nat { action } => {
            let enable = matches!(action, NatAction::Enable);
            let report = commands::set_nat(&config, enable).await?;
            if report.ssh_nat_enable {
                println!("Nat is enabled");
            } else {
                println!("Nat is not enabled");
            }
        }
        Command::IdToken => {
            println!("{}", commands::id_token(&config).await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}
