//! Setup stages and progress reporting

use std::fmt;

use serde::Serialize;
use vc_core::types::HostRole;

/// Ordered stages of a full setup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStage {
    /// Connect to both hosts
    AcquireSessions,
    /// Install, certify and configure the exit host
    ConfigureExit,
    /// Install, certify and configure the entry host
    ConfigureEntry,
    /// Exchange CAs and bring up the site-to-site link
    LinkTunnel,
    /// Source-based routing on the entry host
    PolicyRouting,
}

impl SetupStage {
    /// All stages in execution order
    pub const ALL: [SetupStage; 5] = [
        SetupStage::AcquireSessions,
        SetupStage::ConfigureExit,
        SetupStage::ConfigureEntry,
        SetupStage::LinkTunnel,
        SetupStage::PolicyRouting,
    ];

    /// Stage number (1-indexed)
    pub fn number(&self) -> usize {
        match self {
            Self::AcquireSessions => 1,
            Self::ConfigureExit => 2,
            Self::ConfigureEntry => 3,
            Self::LinkTunnel => 4,
            Self::PolicyRouting => 5,
        }
    }

    /// Total number of stages
    pub fn total() -> usize {
        Self::ALL.len()
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AcquireSessions => "acquire sessions",
            Self::ConfigureExit => "configure exit host",
            Self::ConfigureEntry => "configure entry host",
            Self::LinkTunnel => "link tunnel",
            Self::PolicyRouting => "policy routing",
        };
        f.write_str(name)
    }
}

/// Kind of progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    StageStarted,
    Step,
    /// A best-effort step failed; the run continues
    Warning,
    StageCompleted,
    /// The whole run finished successfully
    Finished,
}

/// Progress update sent during a setup run
#[derive(Debug, Clone, Serialize)]
pub struct SetupProgress {
    pub stage: SetupStage,
    pub kind: ProgressKind,
    /// Host the event concerns, if any
    pub role: Option<HostRole>,
    /// Human-readable message
    pub message: String,
}

impl SetupProgress {
    pub fn new(stage: SetupStage, kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            role: None,
            message: message.into(),
        }
    }

    pub fn with_role(mut self, role: HostRole) -> Self {
        self.role = Some(role);
        self
    }
}
