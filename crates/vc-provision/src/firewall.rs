//! iptables rules for a VPN host
//!
//! Rules are planned as an ordered list and applied one at a time with an
//! `iptables -C` check in front of each, so re-running never adds a
//! duplicate row. Management and negotiation traffic must sit at the head of
//! INPUT: those rules are checked by position against `iptables -S INPUT`
//! and moved to the front when found further down.

use std::fmt;

use vc_core::error::CommandError;
use vc_core::traits::RemoteExecutor;
use vc_core::types::{AddressPool, HostRole};

use crate::routing;

/// Netfilter table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Filter,
    Nat,
}

/// Where a rule is placed when it is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Insert at a 1-based position
    Insert(u32),
    Append,
}

/// What a rule is for; used to check ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleClass {
    /// Admin access and IKE/ESP negotiation
    Management,
    /// Skip NAT for traffic leaving through IPsec
    NatExemption,
    Masquerade,
    Forward,
}

/// One iptables rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub table: Table,
    pub chain: &'static str,
    pub placement: Placement,
    pub class: RuleClass,
    /// Match and target arguments
    pub spec: String,
}

impl FirewallRule {
    fn table_args(&self) -> &'static str {
        match self.table {
            Table::Filter => "",
            Table::Nat => "-t nat ",
        }
    }

    /// Probe that succeeds when the rule already exists
    pub fn check_command(&self) -> String {
        format!("iptables {}-C {} {}", self.table_args(), self.chain, self.spec)
    }

    /// Command that deletes the first matching row
    pub fn delete_command(&self) -> String {
        format!("iptables {}-D {} {}", self.table_args(), self.chain, self.spec)
    }

    /// Whether a rule line from `iptables -S` is this rule. The listing adds
    /// an implicit `-m tcp`/`-m udp` match which is ignored here.
    pub fn matches_listed(&self, listed: &str) -> bool {
        let mut tokens = listed.split_whitespace().peekable();
        let mut normalized = Vec::new();
        while let Some(token) = tokens.next() {
            if token == "-m" && matches!(tokens.peek(), Some(&"tcp") | Some(&"udp")) {
                tokens.next();
                continue;
            }
            normalized.push(token);
        }
        normalized.iter().copied().eq(self.spec.split_whitespace())
    }

    /// Command that adds the rule
    pub fn add_command(&self) -> String {
        match self.placement {
            Placement::Insert(pos) => format!(
                "iptables {}-I {} {} {}",
                self.table_args(),
                self.chain,
                pos,
                self.spec
            ),
            Placement::Append => {
                format!("iptables {}-A {} {}", self.table_args(), self.chain, self.spec)
            }
        }
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.chain, self.spec)
    }
}

/// Ordered rule set for one host
#[derive(Debug, Clone)]
pub struct FirewallPlan {
    rules: Vec<FirewallRule>,
}

impl FirewallPlan {
    /// Build the plan for a host.
    ///
    /// `admin_port` is the SSH port the operator is connected on, `egress`
    /// the interface carrying the default route, and `pools` every source
    /// range that should be forwarded and masqueraded.
    pub fn build(admin_port: u16, egress: &str, pools: &[AddressPool]) -> Self {
        let mut rules = Vec::new();

        let management = [
            format!("-p tcp --dport {} -j ACCEPT", admin_port),
            "-p udp --dport 500 -j ACCEPT".to_string(),
            "-p udp --dport 4500 -j ACCEPT".to_string(),
            "-p esp -j ACCEPT".to_string(),
        ];
        for (i, spec) in management.into_iter().enumerate() {
            rules.push(FirewallRule {
                table: Table::Filter,
                chain: "INPUT",
                placement: Placement::Insert(i as u32 + 1),
                class: RuleClass::Management,
                spec,
            });
        }

        for pool in pools {
            rules.push(FirewallRule {
                table: Table::Nat,
                chain: "POSTROUTING",
                placement: Placement::Insert(1),
                class: RuleClass::NatExemption,
                spec: format!("-s {} -m policy --pol ipsec --dir out -j ACCEPT", pool),
            });
        }
        for pool in pools {
            rules.push(FirewallRule {
                table: Table::Nat,
                chain: "POSTROUTING",
                placement: Placement::Append,
                class: RuleClass::Masquerade,
                spec: format!("-s {} -o {} -j MASQUERADE", pool, egress),
            });
        }

        rules.push(FirewallRule {
            table: Table::Filter,
            chain: "FORWARD",
            placement: Placement::Append,
            class: RuleClass::Forward,
            spec: "-m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT".to_string(),
        });
        for pool in pools {
            rules.push(FirewallRule {
                table: Table::Filter,
                chain: "FORWARD",
                placement: Placement::Append,
                class: RuleClass::Forward,
                spec: format!("-s {} -j ACCEPT", pool),
            });
        }

        Self { rules }
    }

    pub fn rules(&self) -> &[FirewallRule] {
        &self.rules
    }
}

/// Source ranges a role forwards: the exit host carries its own clients and
/// the entry clients arriving over the link
pub fn pools_for_role(role: HostRole, client_pool: AddressPool, tunnel_pool: AddressPool) -> Vec<AddressPool> {
    match role {
        HostRole::Entry => vec![client_pool],
        HostRole::Exit => vec![tunnel_pool, client_pool],
    }
}

/// Rule rows of a filter chain as printed by `iptables -S`, without the
/// `-A CHAIN` prefix
async fn list_rows<E>(exec: &E, chain: &str) -> Result<Vec<String>, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    let out = exec.run_privileged(&format!("iptables -S {}", chain)).await?;
    let prefix = format!("-A {} ", chain);
    Ok(out
        .lines()
        .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
        .map(str::to_string)
        .collect())
}

/// Put a head rule at its position, moving it up if it sits lower in the
/// chain. `rows` tracks the chain as edited. Returns true when changed.
async fn place_at_head<E>(
    exec: &E,
    rule: &FirewallRule,
    position: u32,
    rows: &mut Vec<String>,
) -> Result<bool, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    let index = position.saturating_sub(1) as usize;
    if rows.get(index).is_some_and(|row| rule.matches_listed(row)) {
        tracing::trace!("[{}] Rule in place: {}", exec.host(), rule);
        return Ok(false);
    }
    if let Some(found) = rows.iter().position(|row| rule.matches_listed(row)) {
        exec.run_privileged(&rule.delete_command()).await?;
        rows.remove(found);
        tracing::info!("[{}] Moving rule to position {}: {}", exec.host(), position, rule);
    }
    exec.run_privileged(&rule.add_command()).await?;
    rows.insert(index.min(rows.len()), rule.spec.clone());
    Ok(true)
}

/// Apply each rule that is not already present, in plan order
pub async fn apply<E>(exec: &E, plan: &FirewallPlan) -> Result<usize, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    let mut added = 0;
    let mut input_rows: Option<Vec<String>> = None;
    for rule in plan.rules() {
        if let (RuleClass::Management, Placement::Insert(position)) = (rule.class, rule.placement) {
            if input_rows.is_none() {
                input_rows = Some(list_rows(exec, rule.chain).await?);
            }
            let rows = input_rows.get_or_insert_with(Vec::new);
            if place_at_head(exec, rule, position, rows).await? {
                added += 1;
            }
            continue;
        }

        match exec.run_privileged(&rule.check_command()).await {
            Ok(_) => {
                tracing::trace!("[{}] Rule present: {}", exec.host(), rule);
                continue;
            }
            Err(CommandError::Failed { .. }) => {}
            Err(e) => return Err(e),
        }
        exec.run_privileged(&rule.add_command()).await?;
        tracing::debug!("[{}] Added rule: {}", exec.host(), rule);
        added += 1;
    }
    Ok(added)
}

/// Save the live rules so they survive a reboot. Best effort.
pub async fn persist<E>(exec: &E)
where
    E: RemoteExecutor + ?Sized,
{
    if exec.run("command -v netfilter-persistent").await.is_err() {
        tracing::debug!("[{}] netfilter-persistent not installed, rules not saved", exec.host());
        return;
    }
    if let Err(e) = exec.run_privileged("netfilter-persistent save").await {
        tracing::warn!("[{}] Failed to persist firewall rules: {}", exec.host(), e);
    }
}

/// Detect the egress interface, apply the role's rules and persist them
pub async fn configure<E>(
    exec: &E,
    admin_port: u16,
    pools: &[AddressPool],
) -> Result<(), CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    let route = routing::default_route(exec).await?;
    let plan = FirewallPlan::build(admin_port, &route.interface, pools);
    let added = apply(exec, &plan).await?;
    tracing::info!(
        "[{}] Firewall configured ({} of {} rules added)",
        exec.host(),
        added,
        plan.rules().len()
    );
    persist(exec).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockExecutor;

    fn pool(s: &str) -> AddressPool {
        s.parse().unwrap()
    }

    fn plan_for(role: HostRole) -> FirewallPlan {
        let pools = pools_for_role(role, pool("10.10.10.0/24"), pool("10.10.20.0/24"));
        FirewallPlan::build(2222, "eth0", &pools)
    }

    #[test]
    fn test_management_rules_lead_for_both_roles() {
        for role in [HostRole::Entry, HostRole::Exit] {
            let plan = plan_for(role);
            let rules = plan.rules();
            let first_other = rules
                .iter()
                .position(|r| r.class != RuleClass::Management)
                .unwrap();
            assert_eq!(first_other, 4, "{role}");
            assert!(rules[first_other..]
                .iter()
                .all(|r| r.class != RuleClass::Management));

            for (i, rule) in rules[..4].iter().enumerate() {
                assert_eq!(rule.chain, "INPUT");
                assert_eq!(rule.placement, Placement::Insert(i as u32 + 1));
            }
            assert_eq!(rules[0].spec, "-p tcp --dport 2222 -j ACCEPT");
        }
    }

    #[test]
    fn test_nat_exemption_before_masquerade() {
        let plan = plan_for(HostRole::Exit);
        let nat: Vec<&FirewallRule> = plan
            .rules()
            .iter()
            .filter(|r| r.table == Table::Nat)
            .collect();
        let last_exempt = nat
            .iter()
            .rposition(|r| r.class == RuleClass::NatExemption)
            .unwrap();
        let first_masq = nat
            .iter()
            .position(|r| r.class == RuleClass::Masquerade)
            .unwrap();
        assert!(last_exempt < first_masq);
        assert!(nat
            .iter()
            .filter(|r| r.class == RuleClass::NatExemption)
            .all(|r| r.placement == Placement::Insert(1)));
    }

    #[test]
    fn test_role_pools() {
        assert_eq!(plan_for(HostRole::Entry).rules().len(), 4 + 1 + 1 + 2);
        assert_eq!(plan_for(HostRole::Exit).rules().len(), 4 + 2 + 2 + 3);
    }

    #[test]
    fn test_commands() {
        let plan = plan_for(HostRole::Entry);
        let rule = &plan.rules()[4];
        assert_eq!(
            rule.check_command(),
            "iptables -t nat -C POSTROUTING -s 10.10.10.0/24 -m policy --pol ipsec --dir out -j ACCEPT"
        );
        assert_eq!(
            rule.add_command(),
            "iptables -t nat -I POSTROUTING 1 -s 10.10.10.0/24 -m policy --pol ipsec --dir out -j ACCEPT"
        );
    }

    #[test]
    fn test_listed_rule_matching() {
        let plan = plan_for(HostRole::Entry);
        let admin = &plan.rules()[0];
        assert!(admin.matches_listed("-p tcp -m tcp --dport 2222 -j ACCEPT"));
        assert!(admin.matches_listed("-p tcp --dport 2222 -j ACCEPT"));
        assert!(!admin.matches_listed("-s 192.0.2.7/32 -p tcp -m tcp --dport 2222 -j ACCEPT"));
        assert!(!admin.matches_listed("-p tcp -m tcp --dport 22 -j ACCEPT"));
    }

    #[tokio::test]
    async fn test_apply_skips_present_rules() {
        let exec = MockExecutor::new("203.0.113.10");
        exec.respond(
            "iptables -S INPUT",
            "-P INPUT ACCEPT\n\
             -A INPUT -p tcp -m tcp --dport 2222 -j ACCEPT\n\
             -A INPUT -p udp -m udp --dport 500 -j ACCEPT\n\
             -A INPUT -p udp -m udp --dport 4500 -j ACCEPT\n\
             -A INPUT -i lo -j ACCEPT\n",
        );
        let plan = plan_for(HostRole::Entry);

        let added = apply(&exec, &plan).await.unwrap();

        assert_eq!(added, 1);
        assert_eq!(exec.count_matching("iptables -S INPUT"), 1);
        assert_eq!(exec.count_matching("iptables -I INPUT 4 -p esp -j ACCEPT"), 1);
        assert_eq!(exec.count_matching("iptables -D"), 0);
        assert_eq!(exec.count_matching("iptables -A"), 0);
    }

    #[tokio::test]
    async fn test_admin_rule_below_drop_is_moved_to_head() {
        let exec = MockExecutor::new("203.0.113.10");
        exec.respond(
            "iptables -S INPUT",
            "-P INPUT ACCEPT\n\
             -A INPUT -j DROP\n\
             -A INPUT -p tcp -m tcp --dport 2222 -j ACCEPT\n",
        );
        let plan = plan_for(HostRole::Entry);

        apply(&exec, &plan).await.unwrap();

        let input: Vec<String> = exec
            .commands()
            .into_iter()
            .filter(|c| c.contains(" INPUT ") && !c.contains("-S"))
            .collect();
        assert_eq!(
            input,
            vec![
                "iptables -D INPUT -p tcp --dport 2222 -j ACCEPT",
                "iptables -I INPUT 1 -p tcp --dport 2222 -j ACCEPT",
                "iptables -I INPUT 2 -p udp --dport 500 -j ACCEPT",
                "iptables -I INPUT 3 -p udp --dport 4500 -j ACCEPT",
                "iptables -I INPUT 4 -p esp -j ACCEPT",
            ]
        );
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_fatal() {
        let exec = MockExecutor::new("203.0.113.10");
        exec.respond("ip -4 route show default", "default via 203.0.113.1 dev ens3\n");
        exec.fail("-C ", 1, "");
        exec.fail("netfilter-persistent save", 1, "disk full");

        configure(&exec, 22, &[pool("10.10.10.0/24")]).await.unwrap();
        assert_eq!(exec.count_matching("-o ens3 -j MASQUERADE"), 2);
    }
}
