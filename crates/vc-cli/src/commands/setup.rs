//! Setup command implementation

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vc_provision::Provisioner;

use super::context::CommandContext;
use crate::output::{print_error, print_info, print_progress, print_success, print_warning};

/// Provision both hosts and link them
pub async fn setup_command(ctx: CommandContext) -> Result<()> {
    let topology = &ctx.config.topology;
    if !topology.pools_disjoint() {
        anyhow::bail!(
            "client_pool {} and tunnel_pool {} overlap; choose disjoint ranges",
            topology.client_pool,
            topology.tunnel_pool
        );
    }

    print_info(&format!(
        "Setting up chain {} -> {}",
        topology.entry.address, topology.exit.address
    ));

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_progress(&event);
        }
    });

    let provisioner = Provisioner::new(ctx.connector)
        .with_progress(tx)
        .with_cancellation(token)
        .with_options(ctx.config.setup.clone());
    let result = provisioner.run_full_setup(topology).await;

    // Closes the progress channel so the printer drains and exits
    drop(provisioner);
    let _ = printer.await;

    match result {
        Ok(()) => {
            print_success("VPN chain is ready");
            print_info("Add a client login with 'vpn-chain users add <name>'");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            print_warning(&format!("Setup cancelled during {}", e.stage));
            print_info("Re-run 'vpn-chain setup' to continue; completed steps are skipped");
            Err(e.into())
        }
        Err(e) => {
            print_error(&e.to_string());
            print_info("Re-run 'vpn-chain setup' after fixing the cause; completed steps are skipped");
            Err(e.into())
        }
    }
}
