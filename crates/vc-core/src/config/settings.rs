//! Connection and setup settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// SSH transport settings shared by every host session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Time allowed for TCP connect, handshake and authentication
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Retry policy for establishing a session
    pub backoff: BackoffConfig,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Delay schedule between connection attempts: `initial * multiplier^n`,
/// capped at `max`, spread by `jitter`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the second attempt
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Upper bound on any single delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    pub multiplier: f64,

    /// Fraction of each delay randomized away, 0.0 to 1.0
    pub jitter: f64,

    /// Total connection attempts before giving up (at least 1)
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: 3,
        }
    }
}

/// Knobs for a provisioning run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupOptions {
    /// Configure the entry and exit hosts concurrently. The tunnel link
    /// stage still waits for both.
    pub parallel_host_setup: bool,
}
