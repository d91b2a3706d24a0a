//! Configuration management for vpn-chain

mod settings;
mod topology;
pub mod serde_utils;

pub use settings::{BackoffConfig, SetupOptions, SshSettings};
pub use topology::TopologyConfig;

use crate::error::ConfigError;
use crate::types::HostDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Hosts and address plan
    pub topology: TopologyConfig,

    /// SSH transport settings
    #[serde(default)]
    pub ssh: SshSettings,

    /// Provisioning run options
    #[serde(default)]
    pub setup: SetupOptions,
}

impl ConfigFile {
    /// Starter configuration written by `config init`
    pub fn template() -> Self {
        let user = whoami::username();
        Self {
            topology: TopologyConfig::new(
                HostDescriptor::new("203.0.113.10").with_user(user.clone()),
                HostDescriptor::new("198.51.100.20").with_user(user),
            ),
            ssh: SshSettings::default(),
            setup: SetupOptions::default(),
        }
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vpn-chain")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    // The file may carry SSH passwords
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| ConfigError::Invalid(format!("Failed to restrict config: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = r#"
[topology]
client_pool = "10.10.10.0/24"
tunnel_pool = "10.10.20.0/24"
entry_domain = "entry.example.net"

[topology.entry]
address = "203.0.113.10"
user = "admin"
password = "secret"

[topology.exit]
address = "198.51.100.20"
port = 2222
key_path = "~/.ssh/id_ed25519"

[ssh]
connect_timeout = 5

[setup]
parallel_host_setup = true
"#;

    #[test]
    fn test_parse_full_config() {
        let config: ConfigFile = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.topology.entry.user, "admin");
        assert_eq!(config.topology.entry.port, 22);
        assert_eq!(config.topology.exit.user, "root");
        assert_eq!(config.topology.exit.port, 2222);
        assert_eq!(
            config.topology.entry_domain.as_deref(),
            Some("entry.example.net")
        );
        assert_eq!(config.ssh.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.ssh.backoff.max_attempts, 3);
        assert!(config.setup.parallel_host_setup);
    }

    #[test]
    fn test_invalid_pool_rejected() {
        let broken = SAMPLE.replace("10.10.20.0/24", "10.10.20.0");
        assert!(toml::from_str::<ConfigFile>(&broken).is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = ConfigFile::template();
        save_config(&path, &config).unwrap();
        let loaded: ConfigFile = load_config(&path).unwrap();

        assert_eq!(loaded.topology, config.topology);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config::<ConfigFile>(Path::new("/nonexistent/vpn-chain.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/etc/key");
        assert_eq!(expand_tilde(plain), PathBuf::from("/etc/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.ssh/id")), home.join(".ssh/id"));
        }
    }
}
