//! ekssm CLI
//!
//! Reach private EKS clusters through SSM port-forwarding tunnels:
//! - `run` wraps a single command in a temporary tunnel
//! - `session` manages persistent background tunnels
//! - `shell` prints the shell integration snippet

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ekssm::commands::{self, ShellKind};
use ekssm::output::print_error;
use ekssm_core::{config, EkssmError};
use ekssm_session::{spawn_signal_listener, AwsRemoteAccess, SessionOrchestrator};

#[derive(Parser)]
#[command(name = "ekssm")]
#[command(author, version, about = "Access private EKS clusters through SSM tunnels")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Increase log verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// AWS region (overrides config and environment)
    #[arg(long, global = true, env = "EKSSM_REGION")]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command against a cluster through a temporary tunnel
    Run {
        #[command(flatten)]
        target: TargetArgs,
        /// Command to run, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Manage persistent tunnel sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Print shell integration for `session switch` and `session stop`
    Shell {
        #[arg(value_enum)]
        shell: ShellKind,
    },
}

#[derive(clap::Args)]
struct TargetArgs {
    /// EKS cluster name
    #[arg(long)]
    cluster_name: String,
    /// Bastion instance to tunnel through
    #[arg(long)]
    instance_id: String,
    /// Local port to bind (a free one is picked if omitted)
    #[arg(long)]
    local_port: Option<String>,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Start a background tunnel session
    Start {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Stop one session, or all sessions
    Stop {
        /// Session to stop (all sessions if omitted)
        #[arg(long)]
        session_id: Option<String>,
    },
    /// List active sessions
    List,
    /// Print the export command for a session's kubeconfig
    Switch {
        /// Session ID
        session_id: String,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Run { .. } => "run",
            Commands::Session { action } => match action {
                SessionAction::Start { .. } => "session start",
                SessionAction::Stop { .. } => "session stop",
                SessionAction::List => "session list",
                SessionAction::Switch { .. } => "session switch",
            },
            Commands::Shell { .. } => "shell",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(EkssmError::CommandFailed { code }) = e.downcast_ref::<EkssmError>() {
                tracing::debug!("Command exited with code {}", code);
                return ExitCode::from(u8::try_from(*code).unwrap_or(1));
            }
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let log_level = match (cli.quiet, cli.debug, cli.verbose) {
        (true, _, _) => "error",
        (false, true, _) => "debug",
        (false, false, 0) => "warn",
        (false, false, 1) => "info",
        (false, false, 2) => "debug",
        (false, false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn execute(cli: Cli) -> Result<()> {
    if let Commands::Shell { shell } = &cli.command {
        print!("{}", commands::shell_integration(*shell));
        return Ok(());
    }

    let mut config = config::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.region.is_some() {
        config.region = cli.region.clone();
    }
    tracing::debug!("Using state directory {:?}", config.base_dir);

    let cancel = CancellationToken::new();
    let signals = spawn_signal_listener(cancel.clone());

    let remote = Arc::new(AwsRemoteAccess::new(config.region.clone()));
    let span = tracing::info_span!("ekssm", command = cli.command.name());
    let orchestrator = SessionOrchestrator::new(config, remote, span);

    let result = match cli.command {
        Commands::Run { target, command } => {
            commands::run_command(
                &orchestrator,
                &target.cluster_name,
                &target.instance_id,
                target.local_port.as_deref(),
                &command,
                &cancel,
            )
            .await
        }
        Commands::Session { action } => match action {
            SessionAction::Start { target } => {
                commands::session_start(
                    &orchestrator,
                    &target.cluster_name,
                    &target.instance_id,
                    target.local_port.as_deref(),
                    &cancel,
                )
                .await
            }
            SessionAction::Stop { session_id } => {
                commands::session_stop(&orchestrator, session_id.as_deref()).await
            }
            SessionAction::List => commands::session_list(&orchestrator).await,
            SessionAction::Switch { session_id } => {
                commands::session_switch(&orchestrator, &session_id).await
            }
        },
        Commands::Shell { .. } => Ok(()),
    };

    // Stop the listener so the runtime can shut down.
    cancel.cancel();
    let _ = signals.await;
    result
}
