//! vc-core: Core abstractions and configuration for vpn-chain
//!
//! This crate provides the host and topology types, the remote execution
//! traits, and the configuration file layout shared by the SSH transport,
//! the provisioning engine and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::TopologyConfig;
pub use error::{CommandError, ConfigError, ConnectionError, VcError};
pub use traits::{Connector, RemoteExecutor};
pub use types::{AddressPool, HostDescriptor, HostRole};
