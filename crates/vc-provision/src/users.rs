//! Per-user EAP credentials in a host's secrets store
//!
//! The host file is the source of truth; nothing is cached between calls.
//! Uniqueness is checked by re-reading the file before each add, which
//! assumes one operator per host at a time. Two concurrent adds for the
//! same name can both pass the check.

use serde::Serialize;

use vc_core::traits::RemoteExecutor;

use crate::error::CredentialError;
use crate::secrets::{self, RESERVED_IDENTITY};
use crate::service;

/// Random bytes in a generated password (hex-encoded on output)
const GENERATED_PASSWORD_BYTES: usize = 16;

/// A VPN user as stored on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserCredential {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

/// CRUD over one host's EAP users
pub struct CredentialStore<'a, E: RemoteExecutor + ?Sized> {
    exec: &'a E,
}

impl<'a, E: RemoteExecutor + ?Sized> CredentialStore<'a, E> {
    pub fn new(exec: &'a E) -> Self {
        Self { exec }
    }

    /// All users, in file order, excluding the link's reserved identity
    pub async fn list(&self) -> Result<Vec<UserCredential>, CredentialError> {
        let doc = secrets::load(self.exec).await?;
        Ok(doc
            .users()
            .map(|e| UserCredential {
                username: e.selector.clone(),
                password: e.secret.clone(),
            })
            .collect())
    }

    /// Add a user and return the stored password. A random one is generated
    /// when `password` is `None` or empty.
    pub async fn add(
        &self,
        username: &str,
        password: Option<&str>,
    ) -> Result<String, CredentialError> {
        validate_username(username)?;
        let password = match password.filter(|p| !p.is_empty()) {
            Some(p) => {
                validate_password(p)?;
                p.to_string()
            }
            None => generate_password(),
        };

        let mut doc = secrets::load(self.exec).await?;
        if doc.user(username).is_some() {
            return Err(CredentialError::DuplicateUser(username.to_string()));
        }

        doc.push_user(username, &password);
        secrets::store(self.exec, &doc).await?;
        self.reload().await;

        tracing::info!("[{}] Added user: {}", self.exec.host(), username);
        Ok(password)
    }

    /// Remove every entry for the user. Removing an absent user succeeds.
    pub async fn remove(&self, username: &str) -> Result<(), CredentialError> {
        validate_username(username)?;
        let mut doc = secrets::load(self.exec).await?;
        if doc.remove_user(username) == 0 {
            tracing::info!("[{}] User {} not present, nothing to remove", self.exec.host(), username);
            return Ok(());
        }

        secrets::store(self.exec, &doc).await?;
        self.reload().await;

        tracing::info!("[{}] Removed user: {}", self.exec.host(), username);
        Ok(())
    }

    /// Stored password for a user
    pub async fn password(&self, username: &str) -> Result<String, CredentialError> {
        let doc = secrets::load(self.exec).await?;
        doc.user(username)
            .map(|e| e.secret.clone())
            .ok_or_else(|| CredentialError::NotFound(username.to_string()))
    }

    /// The file is already written; a failed reload only delays pickup
    async fn reload(&self) {
        if let Err(e) = service::reload_secrets(self.exec).await {
            tracing::warn!("[{}] Failed to reload secrets: {}", self.exec.host(), e);
        }
    }
}

/// Reject names the secrets format cannot carry unambiguously, and the
/// link's reserved identity
pub fn validate_username(username: &str) -> Result<(), CredentialError> {
    // '#' starts a comment in ipsec.secrets
    let invalid = username.is_empty()
        || username == RESERVED_IDENTITY
        || username
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '"' | '\'' | '#'));
    if invalid {
        return Err(CredentialError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), CredentialError> {
    if password.contains(['"', '\n', '\r']) {
        return Err(CredentialError::InvalidPassword);
    }
    Ok(())
}

fn generate_password() -> String {
    let bytes: [u8; GENERATED_PASSWORD_BYTES] = rand::random();
    hex::encode(bytes)
}
