//! Remote filesystem layout used by strongSwan on Debian-family hosts

use vc_core::error::CommandError;
use vc_core::traits::RemoteExecutor;
use vc_core::types::HostRole;

/// Daemon connection definitions
pub const IPSEC_CONF: &str = "/etc/ipsec.conf";

/// Daemon secrets store
pub const IPSEC_SECRETS: &str = "/etc/ipsec.secrets";

pub const CACERTS_DIR: &str = "/etc/ipsec.d/cacerts";
pub const CERTS_DIR: &str = "/etc/ipsec.d/certs";
pub const PRIVATE_DIR: &str = "/etc/ipsec.d/private";

pub const CA_KEY: &str = "/etc/ipsec.d/private/ca-key.pem";
pub const CA_CERT: &str = "/etc/ipsec.d/cacerts/ca-cert.pem";
pub const SERVER_KEY: &str = "/etc/ipsec.d/private/server-key.pem";
pub const SERVER_CERT: &str = "/etc/ipsec.d/certs/server-cert.pem";

/// File name of the host key as referenced from ipsec.conf and ipsec.secrets
pub const SERVER_KEY_NAME: &str = "server-key.pem";
pub const SERVER_CERT_NAME: &str = "server-cert.pem";

/// charon override that disables automatic route installation
pub const CHARON_PRIO_CONF: &str = "/etc/strongswan.d/charon-prio.conf";

/// Plugin config for the userspace IPsec backend
pub const KERNEL_LIBIPSEC_CONF: &str = "/etc/strongswan.d/charon/kernel-libipsec.conf";

/// Forwarding sysctls, rewritten on every run
pub const SYSCTL_DROPIN: &str = "/etc/sysctl.d/60-vpn-chain.conf";

/// systemd unit running the daemon
pub const SERVICE_UNIT: &str = "strongswan-starter";

/// Process name of the IKE daemon
pub const DAEMON_PROCESS: &str = "charon";

/// Where a host stores the CA certificate copied from its peer
pub fn peer_ca_path(peer: HostRole) -> String {
    format!("{}/{}-ca.pem", CACERTS_DIR, peer)
}

/// Common name of the self-signed authority on a host
pub fn ca_label(role: HostRole) -> String {
    format!("vpn-chain CA {}", role)
}

/// Whether a regular file exists, checked with privileges so private
/// directories are visible
pub async fn file_exists<E>(exec: &E, path: &str) -> Result<bool, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    match exec.run_privileged(&format!("test -f {}", path)).await {
        Ok(_) => Ok(true),
        Err(CommandError::Failed { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_ca_paths_differ_by_role() {
        assert_eq!(peer_ca_path(HostRole::Exit), "/etc/ipsec.d/cacerts/exit-ca.pem");
        assert_eq!(peer_ca_path(HostRole::Entry), "/etc/ipsec.d/cacerts/entry-ca.pem");
        assert_ne!(peer_ca_path(HostRole::Entry), CA_CERT);
    }

    #[test]
    fn test_key_names_match_paths() {
        assert!(SERVER_KEY.ends_with(SERVER_KEY_NAME));
        assert!(SERVER_CERT.ends_with(SERVER_CERT_NAME));
    }
}
