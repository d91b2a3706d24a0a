//! Host certificate authority and server certificate provisioning
//!
//! Each artifact is probed before it is generated, so a run that died half
//! way resumes from the first missing file. The CA is created once per host
//! and reused for every later issuance.

use std::borrow::Cow;

use vc_core::error::CommandError;
use vc_core::traits::RemoteExecutor;

use crate::layout::{
    self, CACERTS_DIR, CA_CERT, CA_KEY, CERTS_DIR, PRIVATE_DIR, SERVER_CERT, SERVER_KEY,
    SERVER_KEY_NAME,
};
use crate::secrets;

const KEY_BITS: u32 = 4096;
const CA_LIFETIME_DAYS: u32 = 3650;
const SERVER_LIFETIME_DAYS: u32 = 1825;

/// What [`ensure_host_identity`] had to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityReport {
    pub ca_key_generated: bool,
    pub ca_cert_generated: bool,
    pub server_key_generated: bool,
    pub server_cert_issued: bool,
    pub key_registered: bool,
}

impl IdentityReport {
    /// Whether anything was created or changed
    pub fn changed(&self) -> bool {
        self.ca_key_generated
            || self.ca_cert_generated
            || self.server_key_generated
            || self.server_cert_issued
            || self.key_registered
    }
}

/// Make sure the host has a CA, a server key and certificate for
/// `identity`/`address`, and a registered key reference in ipsec.secrets.
///
/// The first failing command is returned as is; nothing is cleaned up.
pub async fn ensure_host_identity<E>(
    exec: &E,
    identity: &str,
    address: &str,
    ca_label: &str,
) -> Result<IdentityReport, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    let host = exec.host().to_string();
    let mut report = IdentityReport::default();

    let cert_present = layout::file_exists(exec, SERVER_CERT).await?;
    let key_present = layout::file_exists(exec, SERVER_KEY).await?;

    if cert_present && key_present {
        tracing::info!("[{}] Certificates already exist", host);
    } else {
        tracing::info!("[{}] Generating certificates for {}", host, identity);
        exec.run_privileged(&format!(
            "mkdir -p {} {} {} && chmod 700 {}",
            CACERTS_DIR, CERTS_DIR, PRIVATE_DIR, PRIVATE_DIR
        ))
        .await?;

        if !layout::file_exists(exec, CA_KEY).await? {
            exec.run_privileged(&generate_key_command(CA_KEY)).await?;
            report.ca_key_generated = true;
        }

        if !layout::file_exists(exec, CA_CERT).await? {
            exec.run_privileged(&self_sign_command(ca_label)).await?;
            report.ca_cert_generated = true;
        }

        if !key_present {
            exec.run_privileged(&generate_key_command(SERVER_KEY))
                .await?;
            report.server_key_generated = true;
        }

        exec.run_privileged(&issue_command(identity, address))
            .await?;
        report.server_cert_issued = true;
    }

    let mut doc = secrets::load(exec).await?;
    if doc.ensure_rsa_key(SERVER_KEY_NAME) {
        secrets::store(exec, &doc).await?;
        report.key_registered = true;
        tracing::debug!("[{}] Registered host key in secrets", host);
    }

    Ok(report)
}

fn quote(s: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(s))
}

/// Write to a temporary sibling first so a failed generation never leaves
/// a truncated artifact behind
fn into_place(generate: &str, dest: &str) -> String {
    format!(
        "umask 077 && {} > {dest}.tmp && mv {dest}.tmp {dest}",
        generate,
        dest = dest
    )
}

fn generate_key_command(dest: &str) -> String {
    into_place(
        &format!(
            "ipsec pki --gen --type rsa --size {} --outform pem",
            KEY_BITS
        ),
        dest,
    )
}

fn self_sign_command(ca_label: &str) -> String {
    let dn = format!("CN={}", ca_label);
    into_place(
        &format!(
            "ipsec pki --self --ca --lifetime {} --in {} --type rsa --dn {} --outform pem",
            CA_LIFETIME_DAYS,
            CA_KEY,
            quote(&dn)
        ),
        CA_CERT,
    )
}

fn issue_command(identity: &str, address: &str) -> String {
    let dn = format!("CN={}", identity);
    let mut sans = vec![format!("--san {}", quote(address))];
    if identity != address {
        sans.push(format!("--san {}", quote(identity)));
    }
    into_place(
        &format!(
            "ipsec pki --pub --in {key} --type rsa | ipsec pki --issue --lifetime {days} \
             --cacert {cacert} --cakey {cakey} --dn {dn} {sans} \
             --flag serverAuth --flag ikeIntermediate --outform pem",
            key = SERVER_KEY,
            days = SERVER_LIFETIME_DAYS,
            cacert = CA_CERT,
            cakey = CA_KEY,
            dn = quote(&dn),
            sans = sans.join(" "),
        ),
        SERVER_CERT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockExecutor;

    #[test]
    fn test_issue_command_carries_both_sans() {
        let cmd = issue_command("entry.example.net", "203.0.113.10");
        assert!(cmd.contains("--dn CN=entry.example.net"));
        assert!(cmd.contains("--san 203.0.113.10 --san entry.example.net"));
        assert!(cmd.contains("--flag serverAuth --flag ikeIntermediate"));
        assert!(cmd.ends_with(
            "> /etc/ipsec.d/certs/server-cert.pem.tmp && mv /etc/ipsec.d/certs/server-cert.pem.tmp /etc/ipsec.d/certs/server-cert.pem"
        ));
    }

    #[test]
    fn test_issue_command_single_san_without_domain() {
        let cmd = issue_command("203.0.113.10", "203.0.113.10");
        assert_eq!(cmd.matches("--san").count(), 1);
    }

    #[test]
    fn test_self_sign_quotes_label() {
        let cmd = self_sign_command("vpn-chain CA entry");
        assert!(cmd.contains("--dn 'CN=vpn-chain CA entry'"));
        assert!(cmd.contains("--lifetime 3650"));
    }

    #[tokio::test]
    async fn test_existing_certificates_skip_generation() {
        let exec = MockExecutor::new("203.0.113.10")
            .with_file(SERVER_CERT, "cert")
            .with_file(SERVER_KEY, "key")
            .with_file("/etc/ipsec.secrets", ": RSA server-key.pem\n");

        let report = ensure_host_identity(&exec, "203.0.113.10", "203.0.113.10", "ca")
            .await
            .unwrap();

        assert!(!report.changed());
        assert_eq!(exec.count_matching("ipsec pki"), 0);
        assert!(exec.written("/etc/ipsec.secrets").is_none());
    }

    #[tokio::test]
    async fn test_resume_reuses_existing_ca() {
        let exec = MockExecutor::new("198.51.100.20")
            .with_file(CA_KEY, "ca-key")
            .with_file(CA_CERT, "ca-cert");

        let report = ensure_host_identity(&exec, "198.51.100.20", "198.51.100.20", "ca")
            .await
            .unwrap();

        assert!(!report.ca_key_generated);
        assert!(!report.ca_cert_generated);
        assert!(report.server_key_generated);
        assert!(report.server_cert_issued);
        assert!(report.key_registered);
        assert_eq!(exec.count_matching("ipsec pki --gen"), 1);
        assert_eq!(
            exec.written("/etc/ipsec.secrets").as_deref(),
            Some(": RSA server-key.pem\n")
        );
        assert_eq!(exec.file_mode("/etc/ipsec.secrets"), Some(0o600));
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces_stderr() {
        let exec = MockExecutor::new("198.51.100.20");
        exec.fail("ipsec pki --gen", 127, "ipsec: command not found");

        let err = ensure_host_identity(&exec, "h", "h", "ca").await.unwrap_err();
        assert_eq!(err.stderr(), Some("ipsec: command not found"));
        assert_eq!(exec.count_matching("ipsec pki --self"), 0);
    }
}
