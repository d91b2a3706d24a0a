//! strongSwan package and service control

use vc_core::error::CommandError;
use vc_core::traits::RemoteExecutor;

use crate::layout::{KERNEL_LIBIPSEC_CONF, SERVICE_UNIT, SYSCTL_DROPIN};
use crate::templates;

const PACKAGES: &str =
    "strongswan strongswan-pki libcharon-extra-plugins libcharon-extauth-plugins";

/// Install strongSwan unless the `ipsec` tool is already on the path.
/// Returns true when an install was performed.
pub async fn ensure_installed<E>(exec: &E) -> Result<bool, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    match exec.run("which ipsec").await {
        Ok(_) => {
            tracing::info!("[{}] strongSwan already installed", exec.host());
            return Ok(false);
        }
        Err(CommandError::Failed { .. }) => {}
        Err(e) => return Err(e),
    }

    tracing::info!("[{}] Installing strongSwan", exec.host());
    exec.run_privileged(&format!(
        "apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
        PACKAGES
    ))
    .await?;
    Ok(true)
}

/// Prefer native kernel IPsec over the userspace plugin
pub async fn disable_kernel_libipsec<E>(exec: &E) -> Result<(), CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    exec.write_file(
        KERNEL_LIBIPSEC_CONF,
        templates::kernel_libipsec_stanza().as_bytes(),
        0o644,
    )
    .await
}

/// Turn on forwarding and turn off ICMP redirects, now and after reboot
pub async fn enable_forwarding<E>(exec: &E) -> Result<(), CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    let settings: Vec<String> = templates::FORWARDING_SYSCTLS
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    exec.run_privileged(&format!("sysctl -w {}", settings.join(" ")))
        .await?;
    exec.write_file(SYSCTL_DROPIN, templates::sysctl_dropin().as_bytes(), 0o644)
        .await
}

/// Restart the daemon so it rereads its configuration
pub async fn restart<E>(exec: &E) -> Result<(), CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    tracing::info!("[{}] Restarting {}", exec.host(), SERVICE_UNIT);
    exec.run_privileged(&format!("systemctl restart {}", SERVICE_UNIT))
        .await
        .map(|_| ())
}

/// Stop the daemon
pub async fn stop<E>(exec: &E) -> Result<(), CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    tracing::info!("[{}] Stopping {}", exec.host(), SERVICE_UNIT);
    exec.run_privileged(&format!("systemctl stop {}", SERVICE_UNIT))
        .await
        .map(|_| ())
}

/// Ask the daemon to reload ipsec.secrets
pub async fn reload_secrets<E>(exec: &E) -> Result<(), CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    exec.run_privileged("ipsec rereadsecrets").await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockExecutor;

    #[tokio::test]
    async fn test_install_skipped_when_present() {
        let exec = MockExecutor::new("h");
        exec.respond("which ipsec", "/usr/sbin/ipsec\n");

        assert!(!ensure_installed(&exec).await.unwrap());
        assert_eq!(exec.count_matching("apt-get"), 0);
    }

    #[tokio::test]
    async fn test_install_when_missing() {
        let exec = MockExecutor::new("h");
        exec.fail("which ipsec", 1, "");

        assert!(ensure_installed(&exec).await.unwrap());
        let install = exec.commands().pop().unwrap();
        assert!(install.contains("apt-get install -y strongswan strongswan-pki"));
        assert!(exec.privileged_commands().contains(&install));
    }

    #[tokio::test]
    async fn test_forwarding_overwrites_dropin() {
        let exec = MockExecutor::new("h");
        enable_forwarding(&exec).await.unwrap();
        enable_forwarding(&exec).await.unwrap();

        assert_eq!(
            exec.count_matching(
                "sysctl -w net.ipv4.ip_forward=1 net.ipv4.conf.all.accept_redirects=0 net.ipv4.conf.all.send_redirects=0"
            ),
            2
        );
        let dropin = exec.file(SYSCTL_DROPIN).unwrap();
        assert_eq!(dropin.matches("net.ipv4.ip_forward").count(), 1);
    }

    #[tokio::test]
    async fn test_restart_failure_carries_stderr() {
        let exec = MockExecutor::new("h");
        exec.fail("systemctl restart", 5, "Unit strongswan-starter.service not found.");
        let err = restart(&exec).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
