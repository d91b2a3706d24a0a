//! Staged setup of an entry/exit host pair
//!
//! A run walks [`SetupStage::ALL`] in order. Each stage must finish before
//! the next starts and the first failure ends the run with a [`StepError`]
//! naming the stage and host. Nothing is rolled back; every step is either
//! probed first or safe to repeat, so re-running the whole setup is the
//! recovery path.
//!
//! Every remote step races the run's cancellation token. Sessions are
//! closed on every exit path, including cancellation.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vc_core::config::{SetupOptions, TopologyConfig};
use vc_core::traits::{Connector, RemoteExecutor};
use vc_core::types::{HostDescriptor, HostRole};

use crate::certs;
use crate::error::{StageFailure, StepError};
use crate::firewall;
use crate::layout::{self, CA_CERT, CHARON_PRIO_CONF, IPSEC_CONF};
use crate::progress::{ProgressKind, SetupProgress, SetupStage};
use crate::routing;
use crate::service;
use crate::templates::{self, LinkMode, LinkSpec};

/// Runs full setups through a [`Connector`]
pub struct Provisioner<C: Connector> {
    connector: C,
    ctx: RunContext,
}

/// Dependencies shared by every step of a run
struct RunContext {
    progress: Option<mpsc::Sender<SetupProgress>>,
    cancel: CancellationToken,
    options: SetupOptions,
}

impl RunContext {
    /// Never blocks; a full or closed sink drops the event
    fn emit(&self, event: SetupProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(event);
        }
    }

    /// Await one remote step unless the run is cancelled first
    async fn guard<T, E, F>(&self, stage: SetupStage, host: &str, step: F) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StageFailure>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::warn!("[{}] Cancelled during {}", host, stage);
                Err(StepError::cancelled(stage, host))
            }
            result = step => result.map_err(|e| StepError::new(stage, host, e)),
        }
    }
}

impl<C: Connector> Provisioner<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            ctx: RunContext {
                progress: None,
                cancel: CancellationToken::new(),
                options: SetupOptions::default(),
            },
        }
    }

    /// Send progress events to `tx`
    pub fn with_progress(mut self, tx: mpsc::Sender<SetupProgress>) -> Self {
        self.ctx.progress = Some(tx);
        self
    }

    /// Stop the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn with_options(mut self, options: SetupOptions) -> Self {
        self.ctx.options = options;
        self
    }

    /// Provision both hosts and link them.
    ///
    /// The caller is expected to have checked that the two address pools
    /// are disjoint.
    pub async fn run_full_setup(&self, topology: &TopologyConfig) -> Result<(), StepError> {
        let stage = SetupStage::AcquireSessions;
        self.ctx.emit(SetupProgress::new(
            stage,
            ProgressKind::StageStarted,
            "Connecting to entry and exit hosts",
        ));

        let entry = self.acquire(&topology.entry).await?;
        let exit = match self.acquire(&topology.exit).await {
            Ok(session) => session,
            Err(e) => {
                release(&entry).await;
                return Err(e);
            }
        };
        self.ctx.emit(SetupProgress::new(
            stage,
            ProgressKind::StageCompleted,
            "Sessions established",
        ));

        let run = ProvisioningRun {
            topology,
            entry: &entry,
            exit: &exit,
            ctx: &self.ctx,
        };
        let result = run.execute().await;

        release(&entry).await;
        release(&exit).await;

        match &result {
            Ok(()) => {
                tracing::info!("Setup complete: {} -> {}", topology.entry.address, topology.exit.address);
                self.ctx.emit(SetupProgress::new(
                    SetupStage::PolicyRouting,
                    ProgressKind::Finished,
                    "Setup complete",
                ));
            }
            Err(e) => tracing::error!("{}", e),
        }
        result
    }

    async fn acquire(&self, host: &HostDescriptor) -> Result<C::Session, StepError> {
        tracing::info!("[{}] Connecting as {}", host.address, host.user);
        self.ctx
            .guard(
                SetupStage::AcquireSessions,
                &host.address,
                self.connector.connect(host),
            )
            .await
    }
}

async fn release<S: RemoteExecutor>(session: &S) {
    if let Err(e) = session.close().await {
        tracing::debug!("[{}] Error closing session: {}", session.host(), e);
    }
}

/// One run over an acquired session pair
struct ProvisioningRun<'a, S> {
    topology: &'a TopologyConfig,
    entry: &'a S,
    exit: &'a S,
    ctx: &'a RunContext,
}

impl<'a, S: RemoteExecutor> ProvisioningRun<'a, S> {
    async fn execute(&self) -> Result<(), StepError> {
        if self.ctx.options.parallel_host_setup {
            tokio::try_join!(
                self.configure_host(HostRole::Exit),
                self.configure_host(HostRole::Entry)
            )?;
        } else {
            self.configure_host(HostRole::Exit).await?;
            self.configure_host(HostRole::Entry).await?;
        }
        self.link_tunnel().await?;
        self.policy_routing().await
    }

    fn session(&self, role: HostRole) -> &'a S {
        match role {
            HostRole::Entry => self.entry,
            HostRole::Exit => self.exit,
        }
    }

    fn address(&self, role: HostRole) -> &'a str {
        &self.topology.host(role).address
    }

    fn started(&self, stage: SetupStage, role: Option<HostRole>, message: &str) {
        let mut event = SetupProgress::new(stage, ProgressKind::StageStarted, message);
        event.role = role;
        self.ctx.emit(event);
    }

    fn completed(&self, stage: SetupStage, role: Option<HostRole>) {
        let mut event = SetupProgress::new(stage, ProgressKind::StageCompleted, stage.to_string());
        event.role = role;
        self.ctx.emit(event);
    }

    fn step(&self, stage: SetupStage, role: HostRole, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("[{}] {}", self.address(role), message);
        self.ctx
            .emit(SetupProgress::new(stage, ProgressKind::Step, message).with_role(role));
    }

    fn warn(&self, stage: SetupStage, role: HostRole, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[{}] {}", self.address(role), message);
        self.ctx
            .emit(SetupProgress::new(stage, ProgressKind::Warning, message).with_role(role));
    }

    /// ipsec.conf for a role; `mode` of `None` renders the client tunnel only
    fn ipsec_conf(&self, role: HostRole, mode: Option<LinkMode>) -> String {
        let topo = self.topology;
        let identity = topo.identity(role);
        let pool = topo.local_pool(role);
        let peer = match role {
            HostRole::Entry => HostRole::Exit,
            HostRole::Exit => HostRole::Entry,
        };

        match mode {
            None => templates::generate_config(role, identity, pool),
            Some(mode) => {
                let link = LinkSpec {
                    peer_address: self.address(peer),
                    peer_identity: topo.identity(peer),
                    client_pool: topo.client_pool,
                    mode,
                };
                templates::render_ipsec_conf(role, identity, pool, Some(&link))
            }
        }
    }

    /// Stages 2 and 3: install, certify and configure one host
    async fn configure_host(&self, role: HostRole) -> Result<(), StepError> {
        let stage = match role {
            HostRole::Exit => SetupStage::ConfigureExit,
            HostRole::Entry => SetupStage::ConfigureEntry,
        };
        let exec = self.session(role);
        let descriptor = self.topology.host(role);
        let host = descriptor.address.as_str();
        let ctx = self.ctx;

        self.started(stage, Some(role), &format!("Configuring {} host {}", role, host));

        if ctx.guard(stage, host, service::ensure_installed(exec)).await? {
            self.step(stage, role, "Installed strongSwan");
        }

        match ctx
            .guard(stage, host, service::disable_kernel_libipsec(exec))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => self.warn(
                stage,
                role,
                format!("Could not disable kernel-libipsec: {}", e.source),
            ),
        }

        ctx.guard(stage, host, service::enable_forwarding(exec)).await?;
        self.step(stage, role, "IP forwarding enabled");

        let report = ctx
            .guard(
                stage,
                host,
                certs::ensure_host_identity(
                    exec,
                    self.topology.identity(role),
                    host,
                    &layout::ca_label(role),
                ),
            )
            .await?;
        if report.changed() {
            self.step(stage, role, "Certificates provisioned");
        }

        // Entry carries the link as an unloaded stub until both sides are ready
        let conf = match role {
            HostRole::Exit => self.ipsec_conf(role, None),
            HostRole::Entry => self.ipsec_conf(role, Some(LinkMode::Stub)),
        };
        ctx.guard(stage, host, exec.write_file(IPSEC_CONF, conf.as_bytes(), 0o644))
            .await?;
        ctx.guard(
            stage,
            host,
            exec.write_file(
                CHARON_PRIO_CONF,
                templates::charon_routing_stanza().as_bytes(),
                0o644,
            ),
        )
        .await?;
        self.step(stage, role, "Daemon configuration written");

        let pools = firewall::pools_for_role(
            role,
            self.topology.client_pool,
            self.topology.tunnel_pool,
        );
        ctx.guard(stage, host, firewall::configure(exec, descriptor.port, &pools))
            .await?;

        ctx.guard(stage, host, service::restart(exec)).await?;
        self.completed(stage, Some(role));
        Ok(())
    }

    /// Stage 4: exchange CAs, activate the site-to-site definitions and
    /// restart both daemons
    async fn link_tunnel(&self) -> Result<(), StepError> {
        let stage = SetupStage::LinkTunnel;
        let ctx = self.ctx;
        self.started(stage, None, "Linking entry and exit hosts");

        for (from, to) in [
            (HostRole::Exit, HostRole::Entry),
            (HostRole::Entry, HostRole::Exit),
        ] {
            let ca = ctx
                .guard(stage, self.address(from), self.session(from).read_file(CA_CERT))
                .await?;
            ctx.guard(
                stage,
                self.address(to),
                self.session(to)
                    .write_file(&layout::peer_ca_path(from), &ca, 0o644),
            )
            .await?;
            self.step(stage, to, format!("Installed {} CA", from));
        }

        for role in [HostRole::Entry, HostRole::Exit] {
            let conf = self.ipsec_conf(role, Some(LinkMode::Active));
            ctx.guard(
                stage,
                self.address(role),
                self.session(role)
                    .write_file(IPSEC_CONF, conf.as_bytes(), 0o644),
            )
            .await?;
        }

        // Responder first so the entry's initiation has something to reach
        for role in [HostRole::Exit, HostRole::Entry] {
            ctx.guard(stage, self.address(role), service::restart(self.session(role)))
                .await?;
        }

        self.completed(stage, None);
        Ok(())
    }

    /// Stage 5: source-based routing on the entry host
    async fn policy_routing(&self) -> Result<(), StepError> {
        let stage = SetupStage::PolicyRouting;
        let role = HostRole::Entry;
        self.started(stage, Some(role), "Configuring policy routing");

        self.ctx
            .guard(
                stage,
                self.address(role),
                routing::configure_policy_routing(
                    self.entry,
                    self.address(HostRole::Entry),
                    self.address(HostRole::Exit),
                    self.topology.client_pool,
                ),
            )
            .await?;

        self.completed(stage, Some(role));
        Ok(())
    }
}
