//! vc-cli: Command-line interface for vpn-chain
//!
//! Provides the `vpn-chain` binary for provisioning, inspecting and
//! operating a two-host IKEv2 chain.

pub mod commands;
pub mod output;
