//! Core domain types

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Role a host plays in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    /// Terminates client connections and forwards them into the chain
    Entry,
    /// Receives the site-to-site tunnel and egresses traffic
    Exit,
}

impl HostRole {
    /// Whether this is the egress host
    pub fn is_exit(&self) -> bool {
        matches!(self, HostRole::Exit)
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostRole::Entry => write!(f, "entry"),
            HostRole::Exit => write!(f, "exit"),
        }
    }
}

impl FromStr for HostRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "entry" | "1" => Ok(HostRole::Entry),
            "exit" | "2" => Ok(HostRole::Exit),
            other => Err(ConfigError::Invalid(format!(
                "unknown host role '{}', expected 'entry' or 'exit'",
                other
            ))),
        }
    }
}

/// How to reach and authenticate against one remote host.
///
/// Caller-owned and treated as immutable for the duration of a
/// provisioning run or status query.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostDescriptor {
    /// Host address (IP or DNS name)
    pub address: String,

    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login principal
    #[serde(default = "default_user")]
    pub user: String,

    /// Login password, also used for privilege elevation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key file for public-key authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Pinned SHA256 host key fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_user() -> String {
    "root".to_string()
}

impl HostDescriptor {
    /// Create a descriptor with default port and user
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_SSH_PORT,
            user: default_user(),
            password: None,
            key_path: None,
            host_key: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// `host:port` string suitable for connecting
    pub fn socket_address(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// Whether at least one authentication method is configured
    pub fn has_credential(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty()) || self.key_path.is_some()
    }

    /// Whether commands already run with full privileges
    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

impl fmt::Debug for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDescriptor")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field("host_key", &self.host_key)
            .finish()
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.socket_address())
    }
}

/// An IPv4 address pool in CIDR notation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressPool(Ipv4Net);

impl AddressPool {
    /// Build a pool from a network address and prefix length
    pub fn new(network: std::net::Ipv4Addr, prefix: u8) -> Result<Self, ConfigError> {
        Ipv4Net::new(network, prefix)
            .map(|net| Self(net.trunc()))
            .map_err(|_| ConfigError::InvalidPool(format!("{}/{}", network, prefix)))
    }

    /// The underlying network
    pub fn net(&self) -> Ipv4Net {
        self.0
    }

    /// Whether the two pools share any address
    pub fn overlaps(&self, other: &AddressPool) -> bool {
        self.0.contains(&other.0.network()) || other.0.contains(&self.0.network())
    }
}

impl FromStr for AddressPool {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Net = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPool(s.to_string()))?;
        Ok(Self(net.trunc()))
    }
}

impl TryFrom<String> for AddressPool {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddressPool> for String {
    fn from(pool: AddressPool) -> Self {
        pool.to_string()
    }
}

impl fmt::Display for AddressPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display_and_parse() {
        assert_eq!(HostRole::Entry.to_string(), "entry");
        assert_eq!("EXIT".parse::<HostRole>().unwrap(), HostRole::Exit);
        assert_eq!("1".parse::<HostRole>().unwrap(), HostRole::Entry);
        assert!("middle".parse::<HostRole>().is_err());
    }

    #[test]
    fn test_descriptor_debug_redacts_password() {
        let host = HostDescriptor::new("203.0.113.10").with_password("hunter2");
        let debug = format!("{:?}", host);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_socket_address() {
        assert_eq!(
            HostDescriptor::new("203.0.113.10").with_port(2222).socket_address(),
            "203.0.113.10:2222"
        );
        assert_eq!(HostDescriptor::new("2001:db8::1").socket_address(), "[2001:db8::1]:22");
    }

    #[test]
    fn test_has_credential() {
        assert!(!HostDescriptor::new("h").has_credential());
        assert!(!HostDescriptor::new("h").with_password("").has_credential());
        assert!(HostDescriptor::new("h").with_password("pw").has_credential());
        assert!(HostDescriptor::new("h").with_key_path("/k").has_credential());
    }

    #[test]
    fn test_pool_parse_truncates_host_bits() {
        let pool: AddressPool = "10.10.10.7/24".parse().unwrap();
        assert_eq!(pool.to_string(), "10.10.10.0/24");
        assert!(matches!(
            "10.10.10.0".parse::<AddressPool>(),
            Err(ConfigError::InvalidPool(_))
        ));
        assert!("not-a-cidr".parse::<AddressPool>().is_err());
    }

    #[test]
    fn test_pool_overlap() {
        let a: AddressPool = "10.10.10.0/24".parse().unwrap();
        let b: AddressPool = "10.10.20.0/24".parse().unwrap();
        let wide: AddressPool = "10.10.0.0/16".parse().unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&wide));
        assert!(wide.overlaps(&b));
    }
}
