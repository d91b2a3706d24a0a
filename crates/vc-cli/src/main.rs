//! vpn-chain CLI
//!
//! Provision and operate a two-host chained IKEv2 VPN:
//! - Setup (install, certify, configure and link both hosts)
//! - Status, logs and daemon control
//! - VPN user management

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vc_core::types::HostRole;
use vpn_chain::commands::{
    self, CommandContext, HostSelection, PasswordOverrides, UserAction,
};

#[derive(Parser)]
#[command(name = "vpn-chain")]
#[command(author, version, about = "Chained IKEv2 VPN provisioning over SSH")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    passwords: PasswordArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PasswordArgs {
    /// SSH password for the entry host (overrides the config file)
    #[arg(long, global = true, env = "VPN_CHAIN_ENTRY_PASSWORD", hide_env_values = true)]
    entry_password: Option<String>,

    /// SSH password for the exit host (overrides the config file)
    #[arg(long, global = true, env = "VPN_CHAIN_EXIT_PASSWORD", hide_env_values = true)]
    exit_password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision both hosts and bring up the chain
    Setup,

    /// Show daemon, tunnel and client state
    Status {
        /// Host(s) to query
        #[arg(long, value_enum, default_value = "both")]
        host: HostSelection,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage VPN users
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Show daemon logs and network diagnostics
    Logs {
        /// Host to inspect
        #[arg(long, value_enum, default_value = "entry")]
        host: RoleArg,
        /// Journal lines to include
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: u32,
    },

    /// Restart strongSwan
    Restart {
        #[arg(long, value_enum, default_value = "both")]
        host: HostSelection,
    },

    /// Stop strongSwan
    Stop {
        #[arg(long, value_enum, default_value = "both")]
        host: HostSelection,
    },

    /// Check SSH access to both hosts
    Test,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// List VPN users
    List {
        #[arg(long, value_enum, default_value = "entry")]
        host: RoleArg,
    },
    /// Add a VPN user (a random password is generated if none is given)
    Add {
        username: String,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(long, value_enum, default_value = "entry")]
        host: RoleArg,
    },
    /// Remove a VPN user
    Remove {
        username: String,
        #[arg(long, value_enum, default_value = "entry")]
        host: RoleArg,
    },
    /// Show a VPN user's password
    Show {
        username: String,
        #[arg(long, value_enum, default_value = "entry")]
        host: RoleArg,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (passwords masked)
    Show,
    /// Show config file path
    Path,
    /// Write a starter configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// A single host
#[derive(Clone, Copy, clap::ValueEnum)]
enum RoleArg {
    Entry,
    Exit,
}

impl From<RoleArg> for HostRole {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Entry => HostRole::Entry,
            RoleArg::Exit => HostRole::Exit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
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

    let config_path = cli.config.as_ref();
    let passwords = PasswordOverrides {
        entry: cli.passwords.entry_password,
        exit: cli.passwords.exit_password,
    };
    let load = || CommandContext::load(config_path, &passwords);

    match cli.command {
        Commands::Setup => {
            commands::setup_command(load()?).await?;
        }

        Commands::Status { host, json } => {
            commands::status_command(&load()?, host, json).await?;
        }

        Commands::Users { action } => {
            let (role, action) = match action {
                UsersAction::List { host } => (host, UserAction::List),
                UsersAction::Add {
                    username,
                    password,
                    host,
                } => (host, UserAction::Add { username, password }),
                UsersAction::Remove { username, host } => (host, UserAction::Remove { username }),
                UsersAction::Show { username, host } => (host, UserAction::Show { username }),
            };
            commands::users_command(&load()?, role.into(), action).await?;
        }

        Commands::Logs { host, lines } => {
            commands::logs_command(&load()?, host.into(), lines).await?;
        }

        Commands::Restart { host } => {
            commands::restart_command(&load()?, host).await?;
        }

        Commands::Stop { host } => {
            commands::stop_command(&load()?, host).await?;
        }

        Commands::Test => {
            commands::test_command(&load()?).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path)?,
            ConfigAction::Path => commands::config_path(config_path),
            ConfigAction::Init { force } => commands::config_init(config_path, force)?,
        },
    }

    Ok(())
}
