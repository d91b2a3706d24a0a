//! In-memory executor and connector for tests
//!
//! [`MockExecutor`] answers commands from scripted substring rules, records
//! every command it receives, and backs file reads and writes with a map.
//! `test -f` probes are answered from that map unless a rule overrides them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use vc_core::error::{CommandError, ConnectionError};
use vc_core::traits::{Connector, RemoteExecutor};
use vc_core::types::HostDescriptor;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    outcome: Result<String, (u32, String)>,
}

#[derive(Debug, Clone)]
struct Invocation {
    command: String,
    privileged: bool,
}

#[derive(Debug, Clone)]
struct MockFile {
    contents: Vec<u8>,
    mode: u32,
}

/// Scripted stand-in for a host session
#[derive(Debug)]
pub struct MockExecutor {
    host: String,
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<Invocation>>,
    files: Mutex<BTreeMap<String, MockFile>>,
    writes: Mutex<BTreeMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl MockExecutor {
    /// A host on which every command succeeds with empty output
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            rules: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            files: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Seed a file (mode 0644)
    pub fn with_file(self, path: &str, contents: impl AsRef<[u8]>) -> Self {
        lock(&self.files).insert(
            path.to_string(),
            MockFile {
                contents: contents.as_ref().to_vec(),
                mode: 0o644,
            },
        );
        self
    }

    /// Commands containing `pattern` succeed with `stdout`.
    /// Later rules take precedence over earlier ones.
    pub fn respond(&self, pattern: &str, stdout: &str) -> &Self {
        lock(&self.rules).push(Rule {
            pattern: pattern.to_string(),
            outcome: Ok(stdout.to_string()),
        });
        self
    }

    /// Commands containing `pattern` exit with `code` and `stderr`
    pub fn fail(&self, pattern: &str, code: u32, stderr: &str) -> &Self {
        lock(&self.rules).push(Rule {
            pattern: pattern.to_string(),
            outcome: Err((code, stderr.to_string())),
        });
        self
    }

    /// Every command received, in order
    pub fn commands(&self) -> Vec<String> {
        lock(&self.log).iter().map(|i| i.command.clone()).collect()
    }

    /// Commands received through `run_privileged`
    pub fn privileged_commands(&self) -> Vec<String> {
        lock(&self.log)
            .iter()
            .filter(|i| i.privileged)
            .map(|i| i.command.clone())
            .collect()
    }

    /// Number of commands containing `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        lock(&self.log)
            .iter()
            .filter(|i| i.command.contains(pattern))
            .count()
    }

    /// Current contents of a file
    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.files)
            .get(path)
            .map(|f| String::from_utf8_lossy(&f.contents).into_owned())
    }

    /// Permission bits of a file
    pub fn file_mode(&self, path: &str) -> Option<u32> {
        lock(&self.files).get(path).map(|f| f.mode)
    }

    /// Contents last written through `write_file`, if any
    pub fn written(&self, path: &str) -> Option<String> {
        lock(&self.writes)
            .get(path)
            .map(|c| String::from_utf8_lossy(c).into_owned())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn execute(&self, cmd: &str, privileged: bool) -> Result<String, CommandError> {
        if self.is_closed() {
            return Err(CommandError::Closed);
        }
        lock(&self.log).push(Invocation {
            command: cmd.to_string(),
            privileged,
        });

        let scripted = lock(&self.rules)
            .iter()
            .rev()
            .find(|r| cmd.contains(&r.pattern))
            .map(|r| r.outcome.clone());

        let outcome = match scripted {
            Some(outcome) => outcome,
            None => match self.probe_files(cmd) {
                Some(true) | None => Ok(String::new()),
                Some(false) => Err((1, String::new())),
            },
        };

        outcome.map_err(|(code, stderr)| CommandError::Failed {
            command: cmd.to_string(),
            exit_code: Some(code),
            stderr,
        })
    }

    /// Evaluate `test -f A && test -f B ...` against the file map
    fn probe_files(&self, cmd: &str) -> Option<bool> {
        let files = lock(&self.files);
        let mut all = true;
        for clause in cmd.split("&&") {
            let path = clause.trim().strip_prefix("test -f ")?;
            all &= files.contains_key(path.trim());
        }
        Some(all)
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, cmd: &str) -> Result<String, CommandError> {
        self.execute(cmd, false)
    }

    async fn run_privileged(&self, cmd: &str) -> Result<String, CommandError> {
        self.execute(cmd, true)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, CommandError> {
        if self.is_closed() {
            return Err(CommandError::Closed);
        }
        lock(&self.files)
            .get(path)
            .map(|f| f.contents.clone())
            .ok_or_else(|| CommandError::Failed {
                command: format!("cat {}", path),
                exit_code: Some(1),
                stderr: format!("cat: {}: No such file or directory", path),
            })
    }

    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), CommandError> {
        if self.is_closed() {
            return Err(CommandError::Closed);
        }
        lock(&self.files).insert(
            path.to_string(),
            MockFile {
                contents: contents.to_vec(),
                mode,
            },
        );
        lock(&self.writes).insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out registered [`MockExecutor`]s by host address
#[derive(Debug, Default)]
pub struct MockConnector {
    hosts: HashMap<String, Arc<MockExecutor>>,
    unreachable: HashSet<String>,
    attempts: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host under its own address
    pub fn with_host(mut self, exec: Arc<MockExecutor>) -> Self {
        self.hosts.insert(exec.host().to_string(), exec);
        self
    }

    /// Make connections to `address` fail
    pub fn unreachable(mut self, address: &str) -> Self {
        self.unreachable.insert(address.to_string());
        self
    }

    /// Addresses connected to, in order
    pub fn attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Session = Arc<MockExecutor>;

    async fn connect(&self, host: &HostDescriptor) -> Result<Self::Session, ConnectionError> {
        lock(&self.attempts).push(host.address.clone());

        let refused = |reason: &str| ConnectionError::Refused {
            host: host.socket_address(),
            reason: reason.to_string(),
        };
        if self.unreachable.contains(&host.address) {
            return Err(refused("connection refused"));
        }
        let exec = self
            .hosts
            .get(&host.address)
            .ok_or_else(|| refused("unknown host"))?;
        exec.reopen();
        Ok(Arc::clone(exec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_and_file_probes() {
        let exec = MockExecutor::new("h").with_file("/a", "x");
        exec.respond("uname", "Linux\n");
        exec.fail("false", 1, "nope");

        assert_eq!(exec.run("uname -s").await.unwrap(), "Linux\n");
        assert!(exec.run("false").await.is_err());
        assert!(exec.run_privileged("test -f /a").await.is_ok());
        assert!(exec.run_privileged("test -f /a && test -f /b").await.is_err());
        assert_eq!(exec.privileged_commands().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_commands() {
        let exec = MockExecutor::new("h");
        exec.close().await.unwrap();
        assert_eq!(exec.run("true").await.unwrap_err(), CommandError::Closed);
    }
}
