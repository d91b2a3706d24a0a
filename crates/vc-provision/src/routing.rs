//! Policy routing on the entry host
//!
//! Only traffic sourced from the client pool may consult the tunnel table.
//! The host's own address is pinned to the main table first so the SSH
//! session that is doing the configuring can never be captured.

use std::net::Ipv4Addr;

use vc_core::error::CommandError;
use vc_core::traits::RemoteExecutor;
use vc_core::types::AddressPool;

/// Routing table the tunnel daemon conventionally uses
pub const TUNNEL_TABLE: u32 = 220;

/// Preference of the anti-lockout rule; must sort before [`CLIENT_RULE_PREF`]
pub const HOST_RULE_PREF: u32 = 100;

/// Preference of the client-pool rule
pub const CLIENT_RULE_PREF: u32 = 220;

/// Interface created by the userspace IPsec backend, when loaded
const LIBIPSEC_IFACE: &str = "ipsec0";

/// The host's default route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRoute {
    pub gateway: Option<Ipv4Addr>,
    pub interface: String,
}

/// Parse `ip route show default`; the first route with a device wins
pub fn parse_default_route(output: &str) -> Option<DefaultRoute> {
    output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() != Some(&"default") {
            return None;
        }
        let value_of = |key: &str| {
            fields
                .iter()
                .position(|f| *f == key)
                .and_then(|i| fields.get(i + 1))
                .copied()
        };
        let interface = value_of("dev")?.to_string();
        let gateway = value_of("via").and_then(|gw| gw.parse().ok());
        Some(DefaultRoute { gateway, interface })
    })
}

/// Look up the host's default route
pub async fn default_route<E>(exec: &E) -> Result<DefaultRoute, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    let cmd = "ip -4 route show default";
    let output = exec.run(cmd).await?;
    parse_default_route(&output).ok_or_else(|| CommandError::Failed {
        command: cmd.to_string(),
        exit_code: Some(0),
        stderr: "no IPv4 default route found".to_string(),
    })
}

/// One row of `ip rule show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub pref: u32,
    /// Source selector, `all` or an address/prefix
    pub from: String,
    pub table: String,
}

/// Parse `ip rule show`
pub fn parse_rules(output: &str) -> Vec<PolicyRule> {
    output
        .lines()
        .filter_map(|line| {
            let (pref, rest) = line.split_once(':')?;
            let pref = pref.trim().parse().ok()?;
            let fields: Vec<&str> = rest.split_whitespace().collect();
            let after = |key: &str| {
                fields
                    .iter()
                    .position(|f| *f == key)
                    .and_then(|i| fields.get(i + 1))
                    .map(|s| s.to_string())
            };
            Some(PolicyRule {
                pref,
                from: after("from")?,
                table: after("lookup")?,
            })
        })
        .collect()
}

/// A single routing change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingStep {
    pub command: String,
    /// Failure is logged and the plan continues
    pub best_effort: bool,
}

impl RoutingStep {
    fn required(command: String) -> Self {
        Self {
            command,
            best_effort: false,
        }
    }

    fn optional(command: String) -> Self {
        Self {
            command,
            best_effort: true,
        }
    }
}

/// Facts gathered from the entry host before planning
#[derive(Debug, Clone)]
pub struct RoutingInputs {
    pub host_address: Ipv4Addr,
    pub exit_address: Ipv4Addr,
    pub client_pool: AddressPool,
    pub default_route: DefaultRoute,
    pub existing_rules: Vec<PolicyRule>,
    /// Whether the userspace IPsec interface exists
    pub has_libipsec_iface: bool,
}

/// Plan the routing changes in the order they must be applied
pub fn plan(inputs: &RoutingInputs) -> Vec<RoutingStep> {
    let table = TUNNEL_TABLE.to_string();
    let has_rule = |from: &str, lookup: &str| {
        inputs
            .existing_rules
            .iter()
            .any(|r| r.from == from && r.table == lookup)
    };

    let mut steps = Vec::new();
    let host = inputs.host_address.to_string();
    let iface = &inputs.default_route.interface;

    if !has_rule(&host, "main") {
        steps.push(RoutingStep::required(format!(
            "ip rule add from {} lookup main pref {}",
            host, HOST_RULE_PREF
        )));
    }

    let via = inputs
        .default_route
        .gateway
        .map(|gw| format!(" via {}", gw))
        .unwrap_or_default();
    steps.push(RoutingStep::required(format!(
        "ip route replace {}{} dev {}",
        inputs.exit_address, via, iface
    )));

    if has_rule("all", &table) {
        steps.push(RoutingStep::optional(format!(
            "ip rule del from all lookup {}",
            TUNNEL_TABLE
        )));
    }

    let pool = inputs.client_pool.to_string();
    if !has_rule(&pool, &table) {
        steps.push(RoutingStep::required(format!(
            "ip rule add from {} lookup {} pref {}",
            pool, TUNNEL_TABLE, CLIENT_RULE_PREF
        )));
    }

    let table_dev = if inputs.has_libipsec_iface {
        LIBIPSEC_IFACE
    } else {
        iface.as_str()
    };
    steps.push(RoutingStep::optional(format!(
        "ip route replace default dev {} table {}",
        table_dev, TUNNEL_TABLE
    )));

    steps
}

/// Resolve an address to IPv4, asking the host's resolver for names
pub async fn resolve_ipv4<E>(exec: &E, address: &str) -> Result<Ipv4Addr, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    if let Ok(ip) = address.parse() {
        return Ok(ip);
    }
    let cmd = format!("getent ahostsv4 {}", address);
    let output = exec.run(&cmd).await?;
    output
        .split_whitespace()
        .find_map(|tok| tok.parse().ok())
        .ok_or_else(|| CommandError::Failed {
            command: cmd,
            exit_code: Some(0),
            stderr: format!("could not resolve {} to an IPv4 address", address),
        })
}

/// Gather state from the entry host and apply the plan
pub async fn configure_policy_routing<E>(
    exec: &E,
    host_address: &str,
    exit_address: &str,
    client_pool: AddressPool,
) -> Result<(), CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    let inputs = RoutingInputs {
        host_address: resolve_ipv4(exec, host_address).await?,
        exit_address: resolve_ipv4(exec, exit_address).await?,
        client_pool,
        default_route: default_route(exec).await?,
        existing_rules: parse_rules(&exec.run("ip rule show").await?),
        has_libipsec_iface: exec
            .run(&format!("ip link show {}", LIBIPSEC_IFACE))
            .await
            .is_ok(),
    };

    for step in plan(&inputs) {
        match exec.run_privileged(&step.command).await {
            Ok(_) => tracing::debug!("[{}] {}", exec.host(), step.command),
            Err(e) if step.best_effort => {
                tracing::warn!("[{}] `{}` failed: {}", exec.host(), step.command, e)
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        "[{}] Policy routing: {} via table {}",
        exec.host(),
        client_pool,
        TUNNEL_TABLE
    );
    Ok(())
}
