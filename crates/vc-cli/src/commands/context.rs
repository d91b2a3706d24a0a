//! Configuration and connections shared by the host commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;

use vc_core::config::{self, ConfigFile};
use vc_core::error::ConfigError;
use vc_core::traits::{Connector, RemoteExecutor};
use vc_core::types::{HostDescriptor, HostRole};
use vc_remote::{SshConnector, SshSession};

/// Which host(s) a command targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HostSelection {
    Entry,
    Exit,
    Both,
}

impl HostSelection {
    pub fn roles(self) -> Vec<HostRole> {
        match self {
            HostSelection::Entry => vec![HostRole::Entry],
            HostSelection::Exit => vec![HostRole::Exit],
            HostSelection::Both => vec![HostRole::Entry, HostRole::Exit],
        }
    }
}

/// Passwords supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct PasswordOverrides {
    pub entry: Option<String>,
    pub exit: Option<String>,
}

/// Loaded configuration plus a connector built from its SSH settings
pub struct CommandContext {
    pub config: ConfigFile,
    pub connector: SshConnector,
}

/// Path given with `--config`, or the default location
pub fn resolve_config_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

impl CommandContext {
    pub fn load(config_path: Option<&PathBuf>, passwords: &PasswordOverrides) -> Result<Self> {
        let path = resolve_config_path(config_path);
        let mut config = load_file(&path)?;

        if let Some(pw) = passwords.entry.as_deref().filter(|p| !p.is_empty()) {
            config.topology.entry.password = Some(pw.to_string());
        }
        if let Some(pw) = passwords.exit.as_deref().filter(|p| !p.is_empty()) {
            config.topology.exit.password = Some(pw.to_string());
        }

        let connector = SshConnector::new(config.ssh.clone());
        Ok(Self { config, connector })
    }

    pub fn host(&self, role: HostRole) -> &HostDescriptor {
        self.config.topology.host(role)
    }

    /// Open a session to one host
    pub async fn connect(&self, role: HostRole) -> Result<SshSession> {
        let host = self.host(role);
        self.connector
            .connect(host)
            .await
            .with_context(|| format!("Failed to connect to {} host {}", role, host.address))
    }
}

fn load_file(path: &Path) -> Result<ConfigFile> {
    match config::load_config(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(p)) => anyhow::bail!(
            "No configuration file at {}. Run 'vpn-chain config init' to create one",
            p.display()
        ),
        Err(e) => Err(e).with_context(|| format!("Failed to load config from {}", path.display())),
    }
}

/// Close a session, logging rather than failing
pub async fn release(session: &SshSession) {
    if let Err(e) = session.close().await {
        tracing::debug!("[{}] Error closing session: {}", session.host(), e);
    }
}
