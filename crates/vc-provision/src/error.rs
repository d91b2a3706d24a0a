//! Provisioning and credential errors

use thiserror::Error;

use vc_core::error::{CommandError, ConnectionError};

use crate::progress::SetupStage;

/// Credential store failures. Validation variants are raised before any
/// remote mutation.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Username is empty, reserved, or contains a character the secrets
    /// format treats specially
    #[error("Invalid username '{0}': must be non-empty, not reserved, and free of spaces, ':', '#' or quotes")]
    InvalidUsername(String),

    /// Supplied password cannot be stored in the secrets format
    #[error("Invalid password: must not contain '\"' or line breaks")]
    InvalidPassword,

    /// Username already present on the host
    #[error("User '{0}' already exists")]
    DuplicateUser(String),

    /// No entry for the username
    #[error("User '{0}' not found")]
    NotFound(String),

    /// Reading or writing the secrets file failed
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Underlying cause of a failed setup stage
#[derive(Error, Debug)]
pub enum StageFailure {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Command(#[from] CommandError),

    /// The run was cancelled before the stage finished
    #[error("cancelled")]
    Cancelled,
}

/// A setup run stopped at `stage` on `host`
#[derive(Error, Debug)]
#[error("{stage} failed on {host}: {source}")]
pub struct StepError {
    pub stage: SetupStage,
    pub host: String,
    #[source]
    pub source: StageFailure,
}

impl StepError {
    pub fn new(stage: SetupStage, host: impl Into<String>, source: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            host: host.into(),
            source: source.into(),
        }
    }

    pub fn cancelled(stage: SetupStage, host: impl Into<String>) -> Self {
        Self::new(stage, host, StageFailure::Cancelled)
    }

    /// Whether the run stopped because of cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, StageFailure::Cancelled)
    }

    /// Remote stderr, when a command failed
    pub fn stderr(&self) -> Option<&str> {
        match &self.source {
            StageFailure::Command(e) => e.stderr(),
            _ => None,
        }
    }
}
