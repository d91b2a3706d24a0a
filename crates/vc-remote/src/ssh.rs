//! russh-backed remote executor
//!
//! One [`SshSession`] wraps one authenticated SSH connection. Every command
//! opens its own exec channel on that connection, so commands never share
//! shell state. Commands on a session are serialized by an internal lock.

use std::borrow::Cow;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::sync::Mutex;

use vc_core::config::{expand_tilde, SshSettings};
use vc_core::error::{CommandError, ConnectionError};
use vc_core::traits::{Connector, RemoteExecutor};
use vc_core::types::HostDescriptor;

use crate::reconnect::RetryPolicy;

/// Directory for staging uploads before they are installed in place
const STAGING_DIR: &str = "/tmp";

/// Opens SSH sessions with timeout and bounded retry
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    /// Create a connector with the given transport settings
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    /// Attempt a single connection and authentication
    async fn try_connect(&self, host: &HostDescriptor) -> Result<SshSession, ConnectionError> {
        if !host.has_credential() {
            return Err(ConnectionError::NoCredential(host.address.clone()));
        }

        // Load the key before touching the network so a bad path fails fast
        let key = match &host.key_path {
            Some(path) => Some(load_key(path)?),
            None => None,
        };

        let addr = host.socket_address();
        let observed = Arc::new(StdMutex::new(None));
        let handler = ClientHandler {
            expected_host_key: host.host_key.clone(),
            observed_host_key: Arc::clone(&observed),
        };

        tracing::debug!("Connecting to {}", addr);
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, addr.as_str(), handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => ConnectionError::HostKeyMismatch {
                    host: addr.clone(),
                    expected: host.host_key.clone().unwrap_or_default(),
                    actual: observed
                        .lock()
                        .ok()
                        .and_then(|slot| slot.clone())
                        .unwrap_or_else(|| "unknown".to_string()),
                },
                other => ConnectionError::Refused {
                    host: addr.clone(),
                    reason: other.to_string(),
                },
            })?;

        let refused = |e: russh::Error| ConnectionError::Refused {
            host: addr.clone(),
            reason: e.to_string(),
        };

        tracing::debug!("Authenticating as user '{}'", host.user);
        let mut authenticated = false;
        if let Some(key) = key {
            authenticated = handle
                .authenticate_publickey(&host.user, Arc::new(key))
                .await
                .map_err(refused)?;
            if !authenticated {
                tracing::debug!("Public key rejected for {}@{}", host.user, addr);
            }
        }
        if !authenticated {
            if let Some(password) = host.password.as_deref().filter(|p| !p.is_empty()) {
                authenticated = handle
                    .authenticate_password(&host.user, password)
                    .await
                    .map_err(refused)?;
            }
        }

        if !authenticated {
            return Err(ConnectionError::AuthenticationFailed {
                host: addr,
                user: host.user.clone(),
            });
        }

        Ok(SshSession {
            handle: Mutex::new(Some(handle)),
            address: host.address.clone(),
            is_root: host.is_root(),
            password: host.password.clone().filter(|p| !p.is_empty()),
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, host: &HostDescriptor) -> Result<SshSession, ConnectionError> {
        let mut policy = RetryPolicy::from_config(&self.settings.backoff);

        loop {
            policy.begin_attempt();

            let err = match tokio::time::timeout(
                self.settings.connect_timeout,
                self.try_connect(host),
            )
            .await
            {
                Ok(Ok(session)) => {
                    tracing::info!("Connected to {}", host);
                    return Ok(session);
                }
                Ok(Err(e)) if !is_retryable(&e) => {
                    tracing::error!("Connection to {} failed: {}", host, e);
                    return Err(e);
                }
                Ok(Err(e)) => e,
                Err(_) => ConnectionError::Timeout(host.socket_address()),
            };

            if !policy.has_remaining() {
                return Err(err);
            }

            let delay = policy.next_delay();
            tracing::warn!("Connection failed: {}. Retrying in {:?}", err, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Credential and host-key failures will not change on retry
fn is_retryable(err: &ConnectionError) -> bool {
    matches!(
        err,
        ConnectionError::Refused { .. } | ConnectionError::Timeout(_)
    )
}

fn load_key(path: &Path) -> Result<KeyPair, ConnectionError> {
    let resolved = expand_tilde(path);
    russh_keys::load_secret_key(&resolved, None).map_err(|e| ConnectionError::KeyLoad {
        path: resolved.clone(),
        reason: e.to_string(),
    })
}

/// Fingerprints may be written with or without the `SHA256:` prefix
fn normalize_fingerprint(fp: &str) -> &str {
    let fp = fp.trim();
    fp.strip_prefix("SHA256:").unwrap_or(fp)
}

/// SSH client handler; only host key verification is customized
struct ClientHandler {
    expected_host_key: Option<String>,
    observed_host_key: Arc<StdMutex<Option<String>>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: {}", fingerprint);

        if let Ok(mut slot) = self.observed_host_key.lock() {
            *slot = Some(fingerprint.clone());
        }

        match &self.expected_host_key {
            Some(expected) => {
                let matches =
                    normalize_fingerprint(expected) == normalize_fingerprint(&fingerprint);
                if !matches {
                    tracing::warn!(
                        "Host key differs from configured: expected {}, got {}",
                        expected,
                        fingerprint
                    );
                }
                Ok(matches)
            }
            None => Ok(true),
        }
    }
}

/// An authenticated session on one host
pub struct SshSession {
    handle: Mutex<Option<Handle<ClientHandler>>>,
    address: String,
    is_root: bool,
    password: Option<String>,
}

impl SshSession {
    /// Run `command` on a fresh channel, feeding `stdin` if given.
    ///
    /// `label` is what appears in errors, so secrets piped on stdin or
    /// wrapper noise never leak into messages.
    async fn exec(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        label: &str,
    ) -> Result<Vec<u8>, CommandError> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(CommandError::Closed)?;

        let transport = |e: russh::Error| CommandError::Transport(e.to_string());

        let mut channel = handle.channel_open_session().await.map_err(transport)?;
        channel.exec(true, command).await.map_err(transport)?;
        if let Some(input) = stdin {
            channel.data(input).await.map_err(transport)?;
        }
        channel.eof().await.map_err(transport)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        tracing::trace!("[{}] `{}` exited with {:?}", self.address, label, exit_code);

        if exit_code == Some(0) {
            Ok(stdout)
        } else {
            Err(CommandError::Failed {
                command: label.to_string(),
                exit_code,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            })
        }
    }

    async fn exec_privileged(&self, cmd: &str) -> Result<Vec<u8>, CommandError> {
        let (wrapped, stdin) = elevate(self.is_root, self.password.as_deref(), cmd);
        self.exec(&wrapped, stdin.as_deref().map(str::as_bytes), cmd)
            .await
    }
}

#[async_trait]
impl RemoteExecutor for SshSession {
    fn host(&self) -> &str {
        &self.address
    }

    async fn run(&self, cmd: &str) -> Result<String, CommandError> {
        let out = self.exec(cmd, None, cmd).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn run_privileged(&self, cmd: &str) -> Result<String, CommandError> {
        let out = self.exec_privileged(cmd).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, CommandError> {
        self.exec_privileged(&format!("cat {}", quote(path))).await
    }

    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), CommandError> {
        let staged = staging_path();
        let (upload, install, cleanup) = staging_commands(&staged, path, mode);
        self.exec(&upload, Some(contents), &upload).await?;

        if let Err(e) = self.exec_privileged(&install).await {
            // sudo may have refused before the install's own rm ran
            if let Err(rm) = self.exec(&cleanup, None, &cleanup).await {
                tracing::warn!("[{}] Failed to remove staged {}: {}", self.address, staged, rm);
            }
            return Err(e);
        }
        tracing::debug!("[{}] Wrote {} ({} bytes)", self.address, path, contents.len());
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                tracing::debug!("[{}] Disconnect failed: {}", self.address, e);
            }
            tracing::debug!("[{}] Session closed", self.address);
        }
        Ok(())
    }
}

fn quote(s: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(s))
}

fn staging_path() -> String {
    format!(
        "{}/.vpn-chain-{}",
        STAGING_DIR,
        hex::encode(rand::random::<[u8; 8]>())
    )
}

/// Upload, privileged install and unprivileged cleanup for a staged write.
/// The staged file belongs to the login user, so removing it never needs
/// elevation.
fn staging_commands(staged: &str, path: &str, mode: u32) -> (String, String, String) {
    let upload = format!("umask 077 && cat > {}", staged);
    let install = format!(
        "install -m {:o} {} {}; rc=$?; rm -f {}; exit $rc",
        mode,
        staged,
        quote(path),
        staged
    );
    let cleanup = format!("rm -f {}", staged);
    (upload, install, cleanup)
}

/// Wrap a command for administrative execution. Returns the command line
/// and any stdin needed to satisfy sudo.
fn elevate(is_root: bool, password: Option<&str>, cmd: &str) -> (String, Option<String>) {
    if is_root {
        return (cmd.to_string(), None);
    }
    match password {
        Some(pw) => (
            format!("sudo -S -p '' sh -c {}", quote(cmd)),
            Some(format!("{}\n", pw)),
        ),
        None => (format!("sudo -n sh -c {}", quote(cmd)), None),
    }
}
