//! CLI integration tests
//!
//! Tests the vpn-chain CLI using assert_cmd. Nothing here opens a network
//! connection: every case fails or finishes before a host is contacted.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn vpn_chain() -> Command {
    let mut cmd = Command::cargo_bin("vpn-chain")
        .expect("Failed to locate vpn-chain binary - ensure it's built before running tests");
    cmd.env_remove("VPN_CHAIN_ENTRY_PASSWORD")
        .env_remove("VPN_CHAIN_EXIT_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

const OVERLAPPING: &str = r#"
[topology]
client_pool = "10.10.0.0/16"
tunnel_pool = "10.10.20.0/24"

[topology.entry]
address = "203.0.113.10"
password = "entry-secret"

[topology.exit]
address = "198.51.100.20"
key_path = "~/.ssh/id_ed25519"
"#;

#[test]
fn test_cli_help() {
    vpn_chain()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("vpn-chain"))
        .stdout(predicate::str::contains("Chained IKEv2 VPN provisioning"));
}

#[test]
fn test_cli_version() {
    vpn_chain()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vpn-chain"));
}

#[test]
fn test_cli_users_help() {
    vpn_chain()
        .args(["users", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("remove"));
}

#[test]
fn test_cli_status_rejects_unknown_host() {
    vpn_chain()
        .args(["status", "--host", "middle"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_cli_config_path_honours_flag() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");

    vpn_chain()
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_cli_config_init_writes_template() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    vpn_chain()
        .args(["config", "init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[topology]"));
    assert!(content.contains("client_pool = \"10.10.10.0/24\""));

    vpn_chain()
        .args(["config", "init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_cli_config_show_masks_passwords() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, OVERLAPPING).unwrap();

    vpn_chain()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("<redacted>"))
        .stdout(predicate::str::contains("entry-secret").not());
}

#[test]
fn test_cli_missing_config_points_to_init() {
    let dir = TempDir::new().unwrap();

    vpn_chain()
        .args(["status", "--config"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("vpn-chain config init"));
}

#[test]
fn test_cli_setup_refuses_overlapping_pools() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, OVERLAPPING).unwrap();

    vpn_chain()
        .args(["setup", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("overlap"));
}

#[test]
fn test_cli_invalid_pool_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, OVERLAPPING.replace("10.10.0.0/16", "10.10.0.0")).unwrap();

    vpn_chain()
        .args(["test", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
