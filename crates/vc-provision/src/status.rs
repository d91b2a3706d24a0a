//! Status and diagnostics for one host
//!
//! A snapshot is derived fresh from command output on every query. Parsing
//! is tolerant and individual command failures only blank the affected
//! field; a query never fails as a whole.

use serde::Serialize;

use vc_core::error::CommandError;
use vc_core::traits::RemoteExecutor;

use crate::layout::{DAEMON_PROCESS, SERVICE_UNIT};
use crate::routing::TUNNEL_TABLE;
use crate::templates::{
    ENTRY_CLIENT_CONN, EXIT_CLIENT_CONN, LINK_INBOUND_CONN, LINK_OUTBOUND_CONN,
};

const SA_SECTION: &str = "Security Associations";
const ESTABLISHED: &str = "ESTABLISHED";

/// One established security association
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionRecord {
    /// Connection name from ipsec.conf
    pub name: String,
    /// Daemon-assigned instance number
    pub instance: Option<u32>,
    pub state: String,
    /// Remote endpoint address, when present on the line
    pub remote: Option<String>,
}

/// Point-in-time state of a host's tunnel daemon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Daemon process is running
    pub connected: bool,
    /// The site-to-site link is established
    pub tunnel_active: bool,
    pub active_clients: usize,
    /// When the service last entered the active state; empty if unknown
    pub uptime: String,
    /// Address the host is seen from on the internet; empty if unknown
    pub external_address: String,
    pub connections: Vec<ConnectionRecord>,
}

/// Counts extracted from `ipsec statusall`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaSummary {
    pub active_clients: usize,
    pub tunnel_active: bool,
    pub connections: Vec<ConnectionRecord>,
}

/// Parse the security association section of `ipsec statusall`
pub fn parse_statusall(text: &str) -> SaSummary {
    let mut summary = SaSummary::default();
    let mut in_section = false;

    for line in text.lines().map(str::trim) {
        if line.starts_with(SA_SECTION) {
            in_section = true;
            continue;
        }
        if !in_section || !line.contains(ESTABLISHED) {
            continue;
        }
        let Some(record) = parse_sa_line(line) else {
            continue;
        };

        match record.name.as_str() {
            ENTRY_CLIENT_CONN | EXIT_CLIENT_CONN => summary.active_clients += 1,
            LINK_OUTBOUND_CONN | LINK_INBOUND_CONN => summary.tunnel_active = true,
            _ => {}
        }
        summary.connections.push(record);
    }

    summary
}

/// `ikev2-vpn[3]: ESTABLISHED 5 minutes ago, 203.0.113.10[..]...198.51.100.7[..]`
fn parse_sa_line(line: &str) -> Option<ConnectionRecord> {
    let (head, rest) = line.split_once(':')?;
    let (name, instance) = head.split_once('[')?;
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    let instance = instance.strip_suffix(']').and_then(|n| n.parse().ok());

    let remote = rest
        .split_once("...")
        .map(|(_, peer)| peer.split('[').next().unwrap_or(peer).trim().to_string())
        .filter(|peer| !peer.is_empty());

    Some(ConnectionRecord {
        name: name.to_string(),
        instance,
        state: ESTABLISHED.to_string(),
        remote,
    })
}

/// Query the daemon's state on one host.
///
/// When the daemon process is absent the snapshot is returned after that
/// single probe.
pub async fn query<E>(exec: &E) -> StatusSnapshot
where
    E: RemoteExecutor + ?Sized,
{
    let host = exec.host().to_string();
    let mut snapshot = StatusSnapshot::default();

    snapshot.connected = match exec.run(&format!("pgrep -x {}", DAEMON_PROCESS)).await {
        Ok(_) => true,
        Err(CommandError::Failed { .. }) => false,
        Err(e) => {
            tracing::warn!("[{}] Daemon probe failed: {}", host, e);
            false
        }
    };
    if !snapshot.connected {
        tracing::debug!("[{}] Daemon not running", host);
        return snapshot;
    }

    match exec.run_privileged("ipsec statusall").await {
        Ok(text) => {
            let summary = parse_statusall(&text);
            snapshot.active_clients = summary.active_clients;
            snapshot.tunnel_active = summary.tunnel_active;
            snapshot.connections = summary.connections;
        }
        Err(e) => tracing::warn!("[{}] Failed to read daemon status: {}", host, e),
    }

    match exec
        .run(&format!(
            "systemctl show {} --property=ActiveEnterTimestamp",
            SERVICE_UNIT
        ))
        .await
    {
        Ok(out) => snapshot.uptime = parse_property(&out),
        Err(e) => tracing::debug!("[{}] Uptime unavailable: {}", host, e),
    }

    match exec.run("curl -4 -s --max-time 5 ifconfig.me").await {
        Ok(out) => snapshot.external_address = out.trim().to_string(),
        Err(e) => tracing::debug!("[{}] External address unavailable: {}", host, e),
    }

    snapshot
}

/// Value of a `Key=Value` systemctl property line
fn parse_property(output: &str) -> String {
    output
        .trim()
        .split_once('=')
        .map(|(_, v)| v.trim().to_string())
        .unwrap_or_default()
}

/// Gather a plain-text troubleshooting report. Sections that fail carry an
/// inline note instead of aborting the report.
pub async fn collect_diagnostics<E>(exec: &E, lines: u32) -> String
where
    E: RemoteExecutor + ?Sized,
{
    let sections: [(&str, String, bool); 5] = [
        (
            "Journal",
            format!("journalctl -u {} -n {} --no-pager", SERVICE_UNIT, lines),
            true,
        ),
        ("IPsec Status", "ipsec statusall".to_string(), true),
        ("Interfaces", "ip addr".to_string(), false),
        ("Routes", "ip route".to_string(), false),
        (
            "Policy Routes",
            format!("ip rule list && ip route show table {}", TUNNEL_TABLE),
            false,
        ),
    ];

    let mut report = String::new();
    for (title, cmd, privileged) in sections {
        let result = if privileged {
            exec.run_privileged(&cmd).await
        } else {
            exec.run(&cmd).await
        };
        let body = match result {
            Ok(out) => out.trim_end().to_string(),
            Err(e) => format!("(unavailable: {})", e),
        };
        if !report.is_empty() {
            report.push_str("\n\n");
        }
        report.push_str(&format!("=== {} ===\n{}", title, body));
    }
    report.push('\n');
    report
}
