use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

use remote_admin_relay::relay::config;
use remote_admin_relay::{AuthorizationPolicy, ConsoleAdapter, Orchestrator, serve, ssh_executor};

/// Relay authorized slash commands to a remote host over SSH.
///
/// Reads one JSON command event per line on stdin and writes one JSON
/// outcome per line on stdout. Settings come from the environment, layered
/// over an optional TOML file.
#[derive(Debug, Parser)]
#[command(name = "remote-admin-relay", version, about)]
struct Cli {
    /// Configuration file (default: <config dir>/remote-admin-relay/relay.toml)
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = config::load_layered(cli.config.as_deref())
        .context("failed to load configuration")?;

    let missing = config::validate_startup(&settings);
    if !missing.is_empty() {
        anyhow::bail!("missing required settings: {}", missing.join(", "));
    }
    for key in config::unconfigured_commands(&settings) {
        log::warn!("{} is not set; the operations using it will fail", key);
    }

    let policy = AuthorizationPolicy::from_config(&settings);
    if policy.allowed_user_id.is_none() && policy.allowed_role_id.is_none() {
        log::warn!("No allowed user or role configured; only administrators can run commands");
    }

    if cli.check {
        println!("Configuration OK");
        return Ok(());
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(policy),
        Arc::new(ssh_executor()),
        Arc::new(settings),
    ));
    let adapter = Arc::new(ConsoleAdapter::new(tokio::io::stdout()));

    log::info!("Relay ready, reading command events from stdin");
    serve(orchestrator, BufReader::new(tokio::io::stdin()), adapter).await?;
    log::info!("Input closed, all commands reported");

    Ok(())
}
