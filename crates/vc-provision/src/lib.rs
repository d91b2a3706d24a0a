//! vc-provision: strongSwan provisioning for a two-host VPN chain
//!
//! Everything here talks to hosts only through [`vc_core::RemoteExecutor`],
//! so each component can be driven against a real SSH session or an
//! in-memory mock.
//!
//! - [`Provisioner`] runs the staged setup of an entry and exit host
//! - [`status::query`] reconstructs daemon and tunnel state from command output
//! - [`CredentialStore`] manages per-user EAP secrets on one host

pub mod certs;
pub mod error;
pub mod firewall;
pub mod layout;
pub mod orchestrator;
pub mod progress;
pub mod routing;
pub mod secrets;
pub mod service;
pub mod status;
pub mod templates;
pub mod users;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{CredentialError, StageFailure, StepError};
pub use orchestrator::Provisioner;
pub use progress::{ProgressKind, SetupProgress, SetupStage};
pub use status::{ConnectionRecord, StatusSnapshot};
pub use users::{CredentialStore, UserCredential};
