//! Core error types for vpn-chain

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the vpn-chain ecosystem
#[derive(Error, Debug)]
pub enum VcError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Remote command error
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A host session could not be established or is no longer usable
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// TCP connection or SSH handshake failed
    #[error("Connection to {host} refused: {reason}")]
    Refused { host: String, reason: String },

    /// Connection attempt did not complete in time
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// Authentication failed
    #[error("Authentication failed for {user}@{host}")]
    AuthenticationFailed { host: String, user: String },

    /// Host key did not match the pinned fingerprint
    #[error("Host key verification failed for {host}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        host: String,
        expected: String,
        actual: String,
    },

    /// Private key could not be loaded
    #[error("Failed to load private key {path}: {reason}")]
    KeyLoad { path: PathBuf, reason: String },

    /// Neither a password nor a key was supplied
    #[error("No authentication method configured for {0}")]
    NoCredential(String),

    /// Session was already closed
    #[error("Session closed")]
    Closed,
}

/// A remote command did not complete successfully
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Command ran and exited non-zero (or without reporting an exit status)
    #[error("`{command}` failed (exit {}): {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into()), stderr.trim())]
    Failed {
        command: String,
        exit_code: Option<u32>,
        stderr: String,
    },

    /// Channel-level failure while running the command
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The session has been closed
    #[error("Session closed")]
    Closed,

    /// Command succeeded but its output cannot be used as is
    #[error("Unusable output from `{command}`: {reason}")]
    InvalidOutput { command: String, reason: String },
}

impl CommandError {
    /// Captured stderr, when the command actually ran
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Address pool is not a valid IPv4 CIDR
    #[error("Invalid address pool '{0}': expected IPv4 CIDR such as 10.10.10.0/24")]
    InvalidPool(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
