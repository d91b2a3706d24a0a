//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use vc_core::config::{self, ConfigFile};

use super::context::resolve_config_path;
use crate::output::{print_error, print_info, print_success, print_warning};

const REDACTED: &str = "<redacted>";

/// Show the effective configuration with passwords masked
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_config_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {}", path.display()));
        print_info("Run 'vpn-chain config init' to create one");
        return Ok(());
    }

    let mut file: ConfigFile = config::load_config(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    for host in [&mut file.topology.entry, &mut file.topology.exit] {
        if host.password.is_some() {
            host.password = Some(REDACTED.to_string());
        }
    }

    print_info(&format!("Configuration file: {}", path.display()));
    println!();
    println!("{}", toml::to_string_pretty(&file)?);
    Ok(())
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve_config_path(config_path).display());
}

/// Write a starter configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {}", path.display()));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &ConfigFile::template())
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    print_success(&format!("Created configuration file: {}", path.display()));
    print_info("Edit the host addresses and credentials, then run 'vpn-chain test'");
    Ok(())
}
