//! Structured view of `/etc/ipsec.secrets`
//!
//! The file is parsed into an ordered list of records and serialized back
//! deterministically, so adding or removing a credential never splices text.
//! Lines that are not a recognized `selector : TYPE secret` entry (comments,
//! blank lines, other secret types) are carried through untouched.

use std::fmt;

use vc_core::error::CommandError;
use vc_core::traits::RemoteExecutor;

use crate::layout::{self, IPSEC_SECRETS};

/// Identity reserved for the site-to-site link's own credential
pub const RESERVED_IDENTITY: &str = "tunnel-user";

/// Secret types this tool reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// Private key file reference
    Rsa,
    /// EAP password
    Eap,
}

impl SecretKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "RSA" => Some(Self::Rsa),
            "EAP" => Some(Self::Eap),
            _ => None,
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretKind::Rsa => write!(f, "RSA"),
            SecretKind::Eap => write!(f, "EAP"),
        }
    }
}

/// How a secret was written in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    Double,
    Single,
    Bare,
}

impl Quoting {
    fn mark(self) -> &'static str {
        match self {
            Quoting::Double => "\"",
            Quoting::Single => "'",
            Quoting::Bare => "",
        }
    }
}

/// One recognized secrets entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    /// Left-hand identity; empty for host key references
    pub selector: String,
    pub kind: SecretKind,
    /// Password (without quotes) or key file name
    pub secret: String,
    /// Kept so existing lines render back unchanged
    pub quoting: Quoting,
}

impl fmt::Display for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.selector.is_empty() {
            write!(f, "{} ", self.selector)?;
        }
        let q = self.quoting.mark();
        write!(f, ": {} {}{}{}", self.kind, q, self.secret, q)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SecretLine {
    Entry(SecretEntry),
    Verbatim(String),
}

/// Ordered, round-trippable secrets file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretsDocument {
    lines: Vec<SecretLine>,
}

impl SecretsDocument {
    /// Parse file contents. Never fails; unrecognized lines are kept verbatim.
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|line| match parse_entry(line) {
                Some(entry) => SecretLine::Entry(entry),
                None => SecretLine::Verbatim(line.to_string()),
            })
            .collect();
        Self { lines }
    }

    /// Iterate recognized entries in file order
    pub fn entries(&self) -> impl Iterator<Item = &SecretEntry> {
        self.lines.iter().filter_map(|line| match line {
            SecretLine::Entry(entry) => Some(entry),
            SecretLine::Verbatim(_) => None,
        })
    }

    /// EAP entries excluding the reserved link identity
    pub fn users(&self) -> impl Iterator<Item = &SecretEntry> {
        self.entries().filter(|e| {
            e.kind == SecretKind::Eap && !e.selector.is_empty() && e.selector != RESERVED_IDENTITY
        })
    }

    /// Find the EAP entry for a username
    pub fn user(&self, username: &str) -> Option<&SecretEntry> {
        self.users().find(|e| e.selector == username)
    }

    /// Append an EAP entry
    pub fn push_user(&mut self, username: &str, password: &str) {
        self.lines.push(SecretLine::Entry(SecretEntry {
            selector: username.to_string(),
            kind: SecretKind::Eap,
            secret: password.to_string(),
            quoting: Quoting::Double,
        }));
    }

    /// Drop every EAP entry for `username`; returns how many were removed
    pub fn remove_user(&mut self, username: &str) -> usize {
        let before = self.lines.len();
        self.lines.retain(|line| {
            !matches!(line, SecretLine::Entry(e) if e.kind == SecretKind::Eap && e.selector == username)
        });
        before - self.lines.len()
    }

    /// Register a host key reference unless one for the same file exists.
    /// Returns true when the document changed.
    pub fn ensure_rsa_key(&mut self, key_file: &str) -> bool {
        let present = self
            .entries()
            .any(|e| e.kind == SecretKind::Rsa && e.selector.is_empty() && e.secret == key_file);
        if present {
            return false;
        }
        // Key references go first, ahead of user credentials
        let at = self
            .lines
            .iter()
            .position(|line| matches!(line, SecretLine::Entry(_)))
            .unwrap_or(self.lines.len());
        self.lines.insert(
            at,
            SecretLine::Entry(SecretEntry {
                selector: String::new(),
                kind: SecretKind::Rsa,
                secret: key_file.to_string(),
                quoting: Quoting::Bare,
            }),
        );
        true
    }

    /// Deterministic serialization, one record per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                SecretLine::Entry(entry) => out.push_str(&entry.to_string()),
                SecretLine::Verbatim(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }
}

fn parse_entry(line: &str) -> Option<SecretEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let (selector, rest) = trimmed.split_once(':')?;
    let rest = rest.trim_start();
    let (kind, secret) = match rest.split_once(char::is_whitespace) {
        Some((kind, secret)) => (kind, secret.trim()),
        None => (rest, ""),
    };
    let kind = SecretKind::parse(kind)?;

    let (secret, quoting) = match kind {
        SecretKind::Eap => unquote(secret)?,
        SecretKind::Rsa => (secret, Quoting::Bare),
    };
    if secret.is_empty() {
        return None;
    }

    Some(SecretEntry {
        selector: selector.trim().to_string(),
        kind,
        secret: secret.to_string(),
        quoting,
    })
}

/// Strip one level of quotes. Unquoted secrets must be a single token.
fn unquote(secret: &str) -> Option<(&str, Quoting)> {
    for quoting in [Quoting::Double, Quoting::Single] {
        let mark = quoting.mark();
        if let Some(inner) = secret.strip_prefix(mark) {
            return inner.strip_suffix(mark).map(|s| (s, quoting));
        }
    }
    if secret.contains(char::is_whitespace) {
        return None;
    }
    Some((secret, Quoting::Bare))
}

/// Read and parse the host's secrets file; a missing file is an empty document
pub async fn load<E>(exec: &E) -> Result<SecretsDocument, CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    if !layout::file_exists(exec, IPSEC_SECRETS).await? {
        return Ok(SecretsDocument::default());
    }
    let raw = exec.read_file(IPSEC_SECRETS).await?;
    // A lossy decode would rewrite other lines on the next store
    let text = String::from_utf8(raw).map_err(|e| CommandError::InvalidOutput {
        command: format!("cat {}", IPSEC_SECRETS),
        reason: e.to_string(),
    })?;
    Ok(SecretsDocument::parse(&text))
}

/// Overwrite the host's secrets file, readable by root only
pub async fn store<E>(exec: &E, doc: &SecretsDocument) -> Result<(), CommandError>
where
    E: RemoteExecutor + ?Sized,
{
    exec.write_file(IPSEC_SECRETS, doc.render().as_bytes(), 0o600)
        .await
}
