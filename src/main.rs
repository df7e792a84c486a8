// ABOUTME: Main entry point for the perry CLI
// One subcommand per invocation; tunnel and sync block in the foreground until interrupted

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use perry::config::{PerryConfig, DEFAULT_CONFIG_PATH};
use perry::probe::{PortProbe, SSH_PORT};
use perry::session::{RemoteSessionManager, SessionError};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Exit status for a foreground command stopped by SIGINT/SIGTERM
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser)]
#[command(name = "perry", version, about = "Ephemeral remote Docker hosts over SSH")]
struct Cli {
    /// Path to the YAML or TOML config file
    #[arg(long, visible_alias = "config-path", global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate and register the project's SSH key pair
    CreateKeyPair,
    /// Create the instance, wait for SSH and switch to its docker context
    Create,
    /// Start the instance, wait for SSH and switch to its docker context
    Start,
    /// Stop the instance and switch back to the default docker context
    Stop,
    /// Terminate the instance and everything on it
    Delete {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Push local files and keep both sides in sync until interrupted
    Sync,
    /// Open a shell on the instance, or run a command there
    Ssh {
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Forward the docker socket and configured ports until interrupted
    Tunnel,
    /// Print the instance's current public IP
    Ip,
    /// Enable termination protection
    Protect,
    /// Disable termination protection
    Unprotect,
    /// Report whether termination protection is enabled
    Protection,
    /// Switch the docker CLI context
    Context {
        #[command(subcommand)]
        target: ContextTarget,
    },
}

#[derive(Subcommand)]
enum ContextTarget {
    /// The tunnelled remote daemon
    Remote,
    /// The local default daemon
    Default,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let status = exit_status(&err);
            if status == INTERRUPTED_EXIT {
                info!("Interrupted");
            } else {
                error!("{:#}", err);
            }
            ExitCode::from(status)
        }
    }
}

/// 130 for interruption, the failed child's own code when one exited
/// non-zero (ssh, unison, docker, aws), 1 otherwise
fn exit_status(err: &anyhow::Error) -> u8 {
    let Some(session) = err.downcast_ref::<SessionError>() else {
        return 1;
    };
    if session.is_interrupted() {
        return INTERRUPTED_EXIT;
    }
    session
        .exit_code()
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    let config = PerryConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    let manager = RemoteSessionManager::from_config(&config)?;

    match cli.command {
        Command::CreateKeyPair => print_json(&manager.create_keypair().await?)?,
        Command::Create => {
            print_json(&manager.create_instance().await?)?;
            wait_for_ssh(&manager).await?;
            manager.use_remote_context().await?;
        }
        Command::Start => {
            print_json(&manager.start_instance().await?)?;
            wait_for_ssh(&manager).await?;
            manager.use_remote_context().await?;
        }
        Command::Stop => {
            print_json(&manager.stop_instance().await?)?;
            manager.use_default_context().await?;
        }
        Command::Delete { yes } => {
            if !yes {
                bail!("Refusing to delete {} without --yes", manager.project_code());
            }
            if manager.is_termination_protection_enabled().await? {
                return Err(SessionError::Protected(manager.project_code().to_string()).into());
            }
            print_json(&manager.delete_instance().await?)?;
            manager.use_default_context().await?;
        }
        Command::Sync => manager.sync().await?,
        Command::Ssh { command } => {
            let command = (!command.is_empty()).then(|| command.join(" "));
            manager.ssh_connect(command, Vec::new()).await?;
        }
        Command::Tunnel => manager.start_tunnel().await?,
        Command::Ip => println!("{}", manager.get_ip().await?),
        Command::Protect => manager.enable_termination_protection().await?,
        Command::Unprotect => manager.disable_termination_protection().await?,
        Command::Protection => println!("{}", manager.is_termination_protection_enabled().await?),
        Command::Context { target } => match target {
            ContextTarget::Remote => manager.use_remote_context().await?,
            ContextTarget::Default => manager.use_default_context().await?,
        },
    }
    Ok(())
}

async fn wait_for_ssh(manager: &RemoteSessionManager) -> Result<()> {
    let ip = manager.get_ip().await?;
    PortProbe::default()
        .wait_until_open(&ip, SSH_PORT)
        .await
        .map_err(SessionError::from)?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var("PERRY_LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level.to_lowercase()).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| "perry=info".into());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();
}
