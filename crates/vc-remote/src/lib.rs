//! vc-remote: SSH transport for vpn-chain
//!
//! Implements the [`vc_core::Connector`] and [`vc_core::RemoteExecutor`]
//! traits over russh, with connect timeouts, bounded retry and privilege
//! elevation through sudo for non-root logins.

mod reconnect;
mod ssh;

pub use reconnect::RetryPolicy;
pub use ssh::{SshConnector, SshSession};
