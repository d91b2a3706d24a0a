//! Daemon control, diagnostics and connectivity commands

use anyhow::Result;

use vc_core::traits::RemoteExecutor;
use vc_core::types::HostRole;
use vc_provision::{service, status};

use super::context::{release, CommandContext, HostSelection};
use crate::output::{print_error, print_success};

/// Print the diagnostics report for one host
pub async fn logs_command(ctx: &CommandContext, role: HostRole, lines: u32) -> Result<()> {
    let session = ctx.connect(role).await?;
    let report = status::collect_diagnostics(&session, lines).await;
    release(&session).await;

    println!("{}", report);
    Ok(())
}

/// Restart the daemon on each selected host
pub async fn restart_command(ctx: &CommandContext, selection: HostSelection) -> Result<()> {
    for role in selection.roles() {
        let session = ctx.connect(role).await?;
        let result = service::restart(&session).await;
        release(&session).await;
        result?;
        print_success(&format!("Restarted strongSwan on {} host", role));
    }
    Ok(())
}

/// Stop the daemon on each selected host
pub async fn stop_command(ctx: &CommandContext, selection: HostSelection) -> Result<()> {
    for role in selection.roles() {
        let session = ctx.connect(role).await?;
        let result = service::stop(&session).await;
        release(&session).await;
        result?;
        print_success(&format!("Stopped strongSwan on {} host", role));
    }
    Ok(())
}

/// Connect to both hosts and run a trivial command on each
pub async fn test_command(ctx: &CommandContext) -> Result<()> {
    let mut failures = 0;

    for role in [HostRole::Entry, HostRole::Exit] {
        let address = &ctx.host(role).address;
        let outcome = match ctx.connect(role).await {
            Ok(session) => {
                let result = session.run("uname -sr").await;
                release(&session).await;
                result.map_err(anyhow::Error::from)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(kernel) => print_success(&format!("{} host {}: {}", role, address, kernel.trim())),
            Err(e) => {
                failures += 1;
                print_error(&format!("{} host {}: {:#}", role, address, e));
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of 2 hosts unreachable", failures);
    }
    Ok(())
}
