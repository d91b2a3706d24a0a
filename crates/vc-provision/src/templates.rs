//! Daemon configuration rendering
//!
//! Pure functions from topology parameters to file contents. Nothing here
//! touches a host, and output is byte-identical for identical input.

use std::fmt::Write;

use vc_core::types::{AddressPool, HostRole};

use crate::layout::SERVER_CERT_NAME;

/// Client-facing connection on the entry host
pub const ENTRY_CLIENT_CONN: &str = "ikev2-vpn";

/// Client-facing connection on the exit host
pub const EXIT_CLIENT_CONN: &str = "ikev2-egress";

/// Entry side of the site-to-site link
pub const LINK_OUTBOUND_CONN: &str = "tunnel-to-exit";

/// Exit side of the site-to-site link
pub const LINK_INBOUND_CONN: &str = "tunnel-from-entry";

/// AES-256 / SHA2-256 / MODP-2048 (DH group 14)
const PROPOSAL: &str = "aes256-sha256-modp2048";
const LIFETIME: &str = "24h";
const CLIENT_DNS: &str = "8.8.8.8,8.8.4.4";

const HEADER: &str = "# Managed by vpn-chain. This file is rewritten on every setup run.\n";

/// Whether the site-to-site definition should be negotiated yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Present in the file but never loaded by the daemon
    Stub,
    /// Initiated (entry) or accepted (exit)
    Active,
}

/// Site-to-site link parameters as seen from one host
#[derive(Debug, Clone)]
pub struct LinkSpec<'a> {
    /// Address the peer is reached at
    pub peer_address: &'a str,
    /// Identity the peer presents in its certificate
    pub peer_identity: &'a str,
    /// Entry client pool, the only traffic carried over the link
    pub client_pool: AddressPool,
    pub mode: LinkMode,
}

/// Name of the role's client-facing connection
pub fn client_conn_name(role: HostRole) -> &'static str {
    match role {
        HostRole::Entry => ENTRY_CLIENT_CONN,
        HostRole::Exit => EXIT_CLIENT_CONN,
    }
}

/// Name of the role's side of the site-to-site link
pub fn link_conn_name(role: HostRole) -> &'static str {
    match role {
        HostRole::Entry => LINK_OUTBOUND_CONN,
        HostRole::Exit => LINK_INBOUND_CONN,
    }
}

/// Render ipsec.conf with only the client-facing connection
pub fn generate_config(role: HostRole, identity: &str, pool: AddressPool) -> String {
    render_ipsec_conf(role, identity, pool, None)
}

/// Render the complete ipsec.conf for a host
pub fn render_ipsec_conf(
    role: HostRole,
    identity: &str,
    pool: AddressPool,
    link: Option<&LinkSpec<'_>>,
) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push_str("config setup\n");
    out.push_str("    charondebug=\"ike 1, knl 1, cfg 0\"\n");
    out.push_str("    uniqueids=no\n");

    write_client_conn(&mut out, client_conn_name(role), identity, pool);

    if let Some(link) = link {
        match role {
            HostRole::Entry => write_outbound_link(&mut out, identity, link),
            HostRole::Exit => write_inbound_link(&mut out, identity, link),
        }
    }

    out
}

fn write_client_conn(out: &mut String, name: &str, identity: &str, pool: AddressPool) {
    let _ = writeln!(out, "\nconn {}", name);
    push_lines(
        out,
        &[
            ("auto", "add"),
            ("compress", "no"),
            ("type", "tunnel"),
            ("keyexchange", "ikev2"),
            ("fragmentation", "yes"),
            ("forceencaps", "yes"),
            ("dpdaction", "clear"),
            ("dpddelay", "300s"),
            ("rekey", "no"),
            ("ike", PROPOSAL),
            ("esp", PROPOSAL),
            ("ikelifetime", LIFETIME),
            ("lifetime", LIFETIME),
            ("left", "%any"),
            ("leftid", identity),
            ("leftcert", SERVER_CERT_NAME),
            ("leftsendcert", "always"),
            ("leftsubnet", "0.0.0.0/0"),
            ("right", "%any"),
            ("rightid", "%any"),
            ("rightauth", "eap-mschapv2"),
        ],
    );
    let _ = writeln!(out, "    rightsourceip={}", pool);
    push_lines(
        out,
        &[
            ("rightdns", CLIENT_DNS),
            ("rightsendcert", "never"),
            ("eap_identity", "%identity"),
        ],
    );
}

fn write_outbound_link(out: &mut String, identity: &str, link: &LinkSpec<'_>) {
    let auto = match link.mode {
        LinkMode::Stub => "ignore",
        LinkMode::Active => "start",
    };
    let pool = link.client_pool.to_string();

    let _ = writeln!(out, "\nconn {}", LINK_OUTBOUND_CONN);
    push_lines(
        out,
        &[
            ("auto", auto),
            ("type", "tunnel"),
            ("keyexchange", "ikev2"),
            ("ike", PROPOSAL),
            ("esp", PROPOSAL),
            ("ikelifetime", LIFETIME),
            ("lifetime", LIFETIME),
            ("left", "%defaultroute"),
            ("leftid", identity),
            ("leftauth", "pubkey"),
            ("leftsendcert", "always"),
            ("leftcert", SERVER_CERT_NAME),
            ("leftsubnet", pool.as_str()),
            ("right", link.peer_address),
            ("rightid", link.peer_identity),
            ("rightauth", "pubkey"),
            ("rightsubnet", "0.0.0.0/0"),
        ],
    );
}

fn write_inbound_link(out: &mut String, identity: &str, link: &LinkSpec<'_>) {
    let auto = match link.mode {
        LinkMode::Stub => "ignore",
        LinkMode::Active => "add",
    };
    let pool = link.client_pool.to_string();

    let _ = writeln!(out, "\nconn {}", LINK_INBOUND_CONN);
    push_lines(
        out,
        &[
            ("auto", auto),
            ("type", "tunnel"),
            ("keyexchange", "ikev2"),
            ("ike", PROPOSAL),
            ("esp", PROPOSAL),
            ("ikelifetime", LIFETIME),
            ("lifetime", LIFETIME),
            ("left", "%defaultroute"),
            ("leftid", identity),
            ("leftauth", "pubkey"),
            ("leftsendcert", "always"),
            ("leftcert", SERVER_CERT_NAME),
            ("leftsubnet", "0.0.0.0/0"),
            ("right", link.peer_address),
            ("rightid", link.peer_identity),
            ("rightauth", "pubkey"),
            ("rightsubnet", pool.as_str()),
            ("rightsendcert", "never"),
        ],
    );
}

fn push_lines(out: &mut String, pairs: &[(&str, &str)]) {
    for (key, value) in pairs {
        let _ = writeln!(out, "    {}={}", key, value);
    }
}

/// charon override that stops the daemon installing its own routes.
/// Routing is handled explicitly so management traffic is never captured.
pub fn charon_routing_stanza() -> &'static str {
    "charon {\n    install_routes = no\n    fragment_size = 1200\n}\n"
}

/// Disables the userspace IPsec plugin in favour of kernel IPsec
pub fn kernel_libipsec_stanza() -> &'static str {
    "kernel-libipsec {\n    load = no\n}\n"
}

/// Sysctl settings persisted across reboots
pub const FORWARDING_SYSCTLS: &[(&str, &str)] = &[
    ("net.ipv4.ip_forward", "1"),
    ("net.ipv4.conf.all.accept_redirects", "0"),
    ("net.ipv4.conf.all.send_redirects", "0"),
];

/// Contents of the sysctl.d drop-in
pub fn sysctl_dropin() -> String {
    let mut out = String::from(HEADER);
    for (key, value) in FORWARDING_SYSCTLS {
        let _ = writeln!(out, "{} = {}", key, value);
    }
    out
}
