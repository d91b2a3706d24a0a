//! Two-host chain topology

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::types::{AddressPool, HostDescriptor, HostRole};

/// The full description of one chain: both hosts plus the address plan.
///
/// Precondition: `client_pool` and `tunnel_pool` must not overlap. This is
/// the caller's obligation; provisioning does not check it. Use
/// [`TopologyConfig::pools_disjoint`] before starting a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologyConfig {
    /// Pool handed out to clients of the entry host
    #[serde(default = "default_client_pool")]
    pub client_pool: AddressPool,

    /// Pool handed out by the exit host to its own clients
    #[serde(default = "default_tunnel_pool")]
    pub tunnel_pool: AddressPool,

    /// Certificate/tunnel identity of the entry host (defaults to its address)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_domain: Option<String>,

    /// Certificate/tunnel identity of the exit host (defaults to its address)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_domain: Option<String>,

    /// Host that terminates client connections
    pub entry: HostDescriptor,

    /// Host that egresses traffic
    pub exit: HostDescriptor,
}

fn default_client_pool() -> AddressPool {
    AddressPool::new(Ipv4Addr::new(10, 10, 10, 0), 24).unwrap_or_default()
}

fn default_tunnel_pool() -> AddressPool {
    AddressPool::new(Ipv4Addr::new(10, 10, 20, 0), 24).unwrap_or_default()
}

impl TopologyConfig {
    /// Create a topology with the default address plan
    pub fn new(entry: HostDescriptor, exit: HostDescriptor) -> Self {
        Self {
            client_pool: default_client_pool(),
            tunnel_pool: default_tunnel_pool(),
            entry_domain: None,
            exit_domain: None,
            entry,
            exit,
        }
    }

    /// Descriptor for the given role
    pub fn host(&self, role: HostRole) -> &HostDescriptor {
        match role {
            HostRole::Entry => &self.entry,
            HostRole::Exit => &self.exit,
        }
    }

    /// Identity used in certificates and tunnel ids: the configured domain,
    /// falling back to the host address
    pub fn identity(&self, role: HostRole) -> &str {
        let domain = match role {
            HostRole::Entry => self.entry_domain.as_deref(),
            HostRole::Exit => self.exit_domain.as_deref(),
        };
        domain
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&self.host(role).address)
    }

    /// Domain configured for the role, if any
    pub fn domain(&self, role: HostRole) -> Option<&str> {
        match role {
            HostRole::Entry => self.entry_domain.as_deref(),
            HostRole::Exit => self.exit_domain.as_deref(),
        }
        .filter(|d| !d.trim().is_empty())
    }

    /// Pool the role's own client-facing tunnel hands out
    pub fn local_pool(&self, role: HostRole) -> AddressPool {
        match role {
            HostRole::Entry => self.client_pool,
            HostRole::Exit => self.tunnel_pool,
        }
    }

    /// Whether the two address pools are disjoint
    pub fn pools_disjoint(&self) -> bool {
        !self.client_pool.overlaps(&self.tunnel_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> TopologyConfig {
        TopologyConfig::new(
            HostDescriptor::new("203.0.113.10"),
            HostDescriptor::new("198.51.100.20"),
        )
    }

    #[test]
    fn test_default_pools_are_disjoint() {
        let topo = topology();
        assert_eq!(topo.client_pool.to_string(), "10.10.10.0/24");
        assert_eq!(topo.tunnel_pool.to_string(), "10.10.20.0/24");
        assert!(topo.pools_disjoint());
    }

    #[test]
    fn test_overlapping_pools_detected() {
        let mut topo = topology();
        topo.tunnel_pool = "10.10.0.0/16".parse().unwrap();
        assert!(!topo.pools_disjoint());
    }

    #[test]
    fn test_identity_falls_back_to_address() {
        let mut topo = topology();
        assert_eq!(topo.identity(HostRole::Entry), "203.0.113.10");
        topo.entry_domain = Some("vpn.example.net".to_string());
        assert_eq!(topo.identity(HostRole::Entry), "vpn.example.net");
        topo.exit_domain = Some("  ".to_string());
        assert_eq!(topo.identity(HostRole::Exit), "198.51.100.20");
        assert_eq!(topo.domain(HostRole::Exit), None);
    }

    #[test]
    fn test_local_pool_by_role() {
        let topo = topology();
        assert_eq!(topo.local_pool(HostRole::Entry), topo.client_pool);
        assert_eq!(topo.local_pool(HostRole::Exit), topo.tunnel_pool);
    }
}
