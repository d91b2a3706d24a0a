//! Remote execution traits

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{CommandError, ConnectionError};
use crate::types::HostDescriptor;

/// An authenticated command channel to one remote host.
///
/// Implementations serialize their own use; callers may share a reference
/// across tasks but must not interleave a command with [`close`].
///
/// [`close`]: RemoteExecutor::close
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Address of the remote host, for logging and error context
    fn host(&self) -> &str;

    /// Run a command as the login user and return its stdout.
    ///
    /// A non-zero exit status yields [`CommandError::Failed`] carrying stderr.
    async fn run(&self, cmd: &str) -> Result<String, CommandError>;

    /// Run a command with full administrative privileges
    async fn run_privileged(&self, cmd: &str) -> Result<String, CommandError>;

    /// Read a whole file with administrative privileges
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, CommandError>;

    /// Replace a file's contents atomically and set its permission bits
    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), CommandError>;

    /// Close the session. Further commands fail with `Closed`.
    async fn close(&self) -> Result<(), ConnectionError>;
}

#[async_trait]
impl<T: RemoteExecutor + ?Sized> RemoteExecutor for Arc<T> {
    fn host(&self) -> &str {
        (**self).host()
    }

    async fn run(&self, cmd: &str) -> Result<String, CommandError> {
        (**self).run(cmd).await
    }

    async fn run_privileged(&self, cmd: &str) -> Result<String, CommandError> {
        (**self).run_privileged(cmd).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, CommandError> {
        (**self).read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), CommandError> {
        (**self).write_file(path, contents, mode).await
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        (**self).close().await
    }
}

/// Opens [`RemoteExecutor`] sessions from host descriptors
#[async_trait]
pub trait Connector: Send + Sync {
    /// The session type produced by this connector
    type Session: RemoteExecutor + 'static;

    /// Establish and authenticate a session
    async fn connect(&self, host: &HostDescriptor) -> Result<Self::Session, ConnectionError>;
}
