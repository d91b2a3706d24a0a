//! Running setup twice must leave each host exactly as the first run did.
//!
//! `FakeHost` keeps enough state to make repeat runs observable: iptables
//! chains, the policy rule list, and files created by `ipsec pki` or
//! `write_file`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vc_core::config::TopologyConfig;
use vc_core::error::{CommandError, ConnectionError};
use vc_core::traits::{Connector, RemoteExecutor};
use vc_core::types::HostDescriptor;
use vc_provision::layout::{CA_CERT, CA_KEY, IPSEC_CONF, IPSEC_SECRETS, SERVER_CERT, SERVER_KEY};
use vc_provision::Provisioner;

const ENTRY: &str = "203.0.113.10";
const EXIT: &str = "198.51.100.20";

#[derive(Debug, Default)]
struct HostState {
    files: BTreeMap<String, Vec<u8>>,
    chains: HashMap<(String, String), Vec<String>>,
    rules: Vec<(u32, String, String)>,
    generated: usize,
}

struct FakeHost {
    address: String,
    state: Mutex<HostState>,
}

impl FakeHost {
    fn new(address: &str) -> Arc<Self> {
        let mut state = HostState::default();
        state.rules = vec![
            (0, "all".into(), "local".into()),
            (32766, "all".into(), "main".into()),
            (32767, "all".into(), "default".into()),
        ];
        Arc::new(Self {
            address: address.to_string(),
            state: Mutex::new(state),
        })
    }

    fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.lock().unwrap().files.clone()
    }

    fn chain(&self, table: &str, chain: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .chains
            .get(&(table.to_string(), chain.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn seed_chain(&self, table: &str, chain: &str, rows: &[&str]) {
        self.state.lock().unwrap().chains.insert(
            (table.to_string(), chain.to_string()),
            rows.iter().map(|r| r.to_string()).collect(),
        );
    }

    fn rules(&self) -> Vec<(u32, String, String)> {
        self.state.lock().unwrap().rules.clone()
    }

    fn generated(&self) -> usize {
        self.state.lock().unwrap().generated
    }

    fn failed(cmd: &str) -> CommandError {
        CommandError::Failed {
            command: cmd.to_string(),
            exit_code: Some(1),
            stderr: String::new(),
        }
    }

    fn execute(&self, cmd: &str) -> Result<String, CommandError> {
        let mut state = self.state.lock().unwrap();

        if cmd.starts_with("iptables ") {
            return iptables(&mut state, cmd);
        }
        if cmd.starts_with("test -f ") {
            let all = cmd.split("&&").all(|clause| {
                clause
                    .trim()
                    .strip_prefix("test -f ")
                    .is_some_and(|path| state.files.contains_key(path.trim()))
            });
            return if all { Ok(String::new()) } else { Err(Self::failed(cmd)) };
        }
        if cmd.starts_with("umask 077 && ipsec pki") {
            let dest = cmd
                .rsplit(' ')
                .next()
                .ok_or_else(|| Self::failed(cmd))?
                .to_string();
            state.generated += 1;
            let pem = format!("-----BEGIN {}-----\n", state.generated);
            state.files.insert(dest, pem.into_bytes());
            return Ok(String::new());
        }
        if cmd == "ip -4 route show default" {
            return Ok("default via 192.0.2.1 dev eth0 proto static\n".into());
        }
        if cmd == "ip rule show" {
            return Ok(state
                .rules
                .iter()
                .map(|(pref, from, table)| format!("{}:\tfrom {} lookup {}\n", pref, from, table))
                .collect());
        }
        if let Some(rest) = cmd.strip_prefix("ip rule add ") {
            let f: Vec<&str> = rest.split_whitespace().collect();
            // from X lookup T pref P
            let pref = f[5].parse().unwrap();
            state.rules.push((pref, f[1].to_string(), f[3].to_string()));
            state.rules.sort_by_key(|r| r.0);
            return Ok(String::new());
        }
        if let Some(rest) = cmd.strip_prefix("ip rule del ") {
            let f: Vec<&str> = rest.split_whitespace().collect();
            let before = state.rules.len();
            state.rules.retain(|(_, from, table)| !(from == f[1] && table == f[3]));
            return if state.rules.len() < before { Ok(String::new()) } else { Err(Self::failed(cmd)) };
        }
        if cmd.starts_with("ip link show") {
            return Err(Self::failed(cmd));
        }
        Ok(String::new())
    }
}

fn iptables(state: &mut HostState, cmd: &str) -> Result<String, CommandError> {
    let mut words: Vec<&str> = cmd.split_whitespace().skip(1).collect();
    let table = if words.first() == Some(&"-t") {
        let t = words[1].to_string();
        words.drain(..2);
        t
    } else {
        "filter".to_string()
    };
    let (op, chain) = (words[0], words[1].to_string());
    let rows = state.chains.entry((table, chain)).or_default();

    match op {
        "-C" => {
            let spec = words[2..].join(" ");
            if rows.contains(&spec) {
                Ok(String::new())
            } else {
                Err(FakeHost::failed(cmd))
            }
        }
        "-I" => {
            let pos: usize = words[2].parse().unwrap();
            let spec = words[3..].join(" ");
            rows.insert((pos - 1).min(rows.len()), spec);
            Ok(String::new())
        }
        "-A" => {
            rows.push(words[2..].join(" "));
            Ok(String::new())
        }
        "-D" => {
            let spec = words[2..].join(" ");
            match rows.iter().position(|r| *r == spec) {
                Some(i) => {
                    rows.remove(i);
                    Ok(String::new())
                }
                None => Err(FakeHost::failed(cmd)),
            }
        }
        "-S" => {
            let chain = &words[1];
            let mut out = format!("-P {} ACCEPT\n", chain);
            for row in rows.iter() {
                out.push_str(&format!("-A {} {}\n", chain, row));
            }
            Ok(out)
        }
        other => panic!("unexpected iptables op {other}"),
    }
}

#[async_trait]
impl RemoteExecutor for FakeHost {
    fn host(&self) -> &str {
        &self.address
    }

    async fn run(&self, cmd: &str) -> Result<String, CommandError> {
        self.execute(cmd)
    }

    async fn run_privileged(&self, cmd: &str) -> Result<String, CommandError> {
        self.execute(cmd)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, CommandError> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| Self::failed(&format!("cat {path}")))
    }

    async fn write_file(&self, path: &str, contents: &[u8], _mode: u32) -> Result<(), CommandError> {
        let mut state = self.state.lock().unwrap();
        state.files.insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

struct FakeConnector {
    hosts: Vec<Arc<FakeHost>>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = Arc<FakeHost>;

    async fn connect(&self, host: &HostDescriptor) -> Result<Self::Session, ConnectionError> {
        self.hosts
            .iter()
            .find(|h| h.address == host.address)
            .cloned()
            .ok_or_else(|| ConnectionError::Refused {
                host: host.socket_address(),
                reason: "unknown host".into(),
            })
    }
}

fn setup() -> (Arc<FakeHost>, Arc<FakeHost>, Provisioner<FakeConnector>, TopologyConfig) {
    let entry = FakeHost::new(ENTRY);
    let exit = FakeHost::new(EXIT);
    let connector = FakeConnector {
        hosts: vec![Arc::clone(&entry), Arc::clone(&exit)],
    };
    let mut topology = TopologyConfig::new(HostDescriptor::new(ENTRY), HostDescriptor::new(EXIT));
    topology.entry_domain = Some("entry.example.net".into());
    (entry, exit, Provisioner::new(connector), topology)
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let (entry, exit, provisioner, topology) = setup();

    provisioner.run_full_setup(&topology).await.unwrap();
    let entry_files = entry.files();
    let exit_files = exit.files();
    let entry_rules = entry.rules();
    let entry_input = entry.chain("filter", "INPUT");
    let exit_nat = exit.chain("nat", "POSTROUTING");
    let generated = (entry.generated(), exit.generated());

    provisioner.run_full_setup(&topology).await.unwrap();

    assert_eq!(entry.files(), entry_files);
    assert_eq!(exit.files(), exit_files);
    assert_eq!(entry.rules(), entry_rules);
    assert_eq!(entry.chain("filter", "INPUT"), entry_input);
    assert_eq!(exit.chain("nat", "POSTROUTING"), exit_nat);
    assert_eq!((entry.generated(), exit.generated()), generated);
}

#[tokio::test]
async fn first_run_creates_each_artifact_once() {
    let (entry, exit, provisioner, topology) = setup();

    provisioner.run_full_setup(&topology).await.unwrap();

    for host in [&entry, &exit] {
        assert_eq!(host.generated(), 4, "{}", host.address);
        for path in [CA_KEY, CA_CERT, SERVER_KEY, SERVER_CERT] {
            assert!(host.files().contains_key(path), "{path}");
        }
        let secrets = String::from_utf8(host.files()[IPSEC_SECRETS].clone()).unwrap();
        assert_eq!(secrets.matches(": RSA server-key.pem").count(), 1);
    }

    let conf = String::from_utf8(entry.files()[IPSEC_CONF].clone()).unwrap();
    assert!(conf.contains("leftid=entry.example.net"));
    assert_eq!(conf.matches("conn ").count(), 2);
}

#[tokio::test]
async fn management_rules_head_input_chain() {
    let (entry, exit, provisioner, topology) = setup();

    provisioner.run_full_setup(&topology).await.unwrap();
    provisioner.run_full_setup(&topology).await.unwrap();

    for host in [&entry, &exit] {
        let input = host.chain("filter", "INPUT");
        assert_eq!(
            input,
            vec![
                "-p tcp --dport 22 -j ACCEPT",
                "-p udp --dport 500 -j ACCEPT",
                "-p udp --dport 4500 -j ACCEPT",
                "-p esp -j ACCEPT",
            ]
        );
    }

    let nat = exit.chain("nat", "POSTROUTING");
    let first_masquerade = nat.iter().position(|r| r.contains("MASQUERADE")).unwrap();
    assert!(nat[..first_masquerade].iter().all(|r| r.contains("--pol ipsec")));
    assert_eq!(nat.len(), 4);
}

#[tokio::test]
async fn existing_drop_is_pushed_below_management_rules() {
    let (entry, _exit, provisioner, topology) = setup();
    entry.seed_chain("filter", "INPUT", &["-j DROP", "-p tcp --dport 22 -j ACCEPT"]);

    provisioner.run_full_setup(&topology).await.unwrap();

    assert_eq!(
        entry.chain("filter", "INPUT"),
        vec![
            "-p tcp --dport 22 -j ACCEPT",
            "-p udp --dport 500 -j ACCEPT",
            "-p udp --dport 4500 -j ACCEPT",
            "-p esp -j ACCEPT",
            "-j DROP",
        ]
    );
}

#[tokio::test]
async fn client_traffic_only_uses_tunnel_table() {
    let (entry, _exit, provisioner, topology) = setup();

    provisioner.run_full_setup(&topology).await.unwrap();

    let rules = entry.rules();
    assert!(rules.contains(&(100, ENTRY.to_string(), "main".to_string())));
    assert!(rules.contains(&(220, "10.10.10.0/24".to_string(), "220".to_string())));
    assert!(!rules.iter().any(|(_, from, table)| from == "all" && table == "220"));
}
