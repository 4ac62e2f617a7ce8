//! Lifecycle controller.
//!
//! # Responsibilities
//! - Drive the system through its states from secrets to a running fleet
//! - Own the tunnel retry policy
//! - React to restart-budget exhaustion per the configured policy
//! - Drain in reverse dependency order on termination
//!
//! # Data Flow
//! ```text
//! Init
//!  → ResolvingSecrets   SecretResolver::resolve(environment)
//!  → TunnelStarting     TunnelManager::bring_up (retried with backoff on
//!                       handshake timeout, credentials re-resolved each time)
//!  → ServicesStarting   ProcessSupervisor::start_all, then
//!                       HealthAggregator::wait_until_ready
//!  → Running ⇄ Degraded  role exhausted its budget (degrade policy)
//!  → Draining           stop roles in reverse start order, tear down tunnel
//!  → Stopped
//!
//! Any startup error → cleanup → Fatal
//! ```
//!
//! # Design Decisions
//! - Startup errors are always fatal; nothing runs without the tunnel
//! - A signal during startup abandons startup and drains what was started
//! - A second signal during draining skips the remaining grace periods

use futures_util::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::{BudgetPolicy, SupervisorConfig};
use crate::health::{HealthAggregator, HealthServer};
use crate::lifecycle::error::{ExitCode, StartupError};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::TerminationSignal;
use crate::lifecycle::state::LifecycleState;
use crate::resilience::Backoff;
use crate::secrets::{CredentialKind, SecretError, SecretResolver, SecretSource};
use crate::supervisor::{ProcessState, ProcessSupervisor, ServiceRole, SupervisorError, SupervisorSettings};
use crate::tunnel::{LinkDriver, TunnelConfig, TunnelHandle, TunnelManager};

/// How `run` ended.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: LifecycleState,
    pub exit_code: ExitCode,
    pub error: Option<StartupError>,
}

enum Abort {
    Signal(TerminationSignal),
    Error(StartupError),
}

impl From<StartupError> for Abort {
    fn from(error: StartupError) -> Self {
        Abort::Error(error)
    }
}

impl From<SecretError> for Abort {
    fn from(error: SecretError) -> Self {
        Abort::Error(error.into())
    }
}

impl From<SupervisorError> for Abort {
    fn from(error: SupervisorError) -> Self {
        Abort::Error(error.into())
    }
}

/// Top-level orchestrator.
pub struct LifecycleController<S> {
    config: SupervisorConfig,
    resolver: SecretResolver<S>,
    tunnel: TunnelManager,
    tunnel_config: TunnelConfig,
    tunnel_handle: Mutex<Option<Arc<TunnelHandle>>>,
    supervisor: ProcessSupervisor,
    health: Arc<HealthAggregator>,
    state: watch::Sender<LifecycleState>,
    shutdown: Shutdown,
    health_address: Mutex<Option<SocketAddr>>,
}

impl<S: SecretSource> LifecycleController<S> {
    /// Build every subsystem and register the configured roles.
    pub fn new(config: SupervisorConfig, source: S, driver: Arc<dyn LinkDriver>) -> Result<Self, StartupError> {
        let environment = config.environment;
        let resolver = SecretResolver::new(source, config.secrets.clone());
        let tunnel_config = TunnelConfig::from_section(
            &config.tunnel,
            resolver.reference(environment, CredentialKind::PrivateKey),
            resolver.reference(environment, CredentialKind::PresharedKey),
        );

        let supervisor = ProcessSupervisor::new(SupervisorSettings::from_config(&config));
        for role in &config.roles {
            supervisor.register(ServiceRole::from(role))?;
        }
        let health = Arc::new(HealthAggregator::new(supervisor.clone(), &config.health));
        let (state, _) = watch::channel(LifecycleState::Init);

        Ok(Self {
            config,
            resolver,
            tunnel: TunnelManager::new(driver),
            tunnel_config,
            tunnel_handle: Mutex::new(None),
            supervisor,
            health,
            state,
            shutdown: Shutdown::new(),
            health_address: Mutex::new(None),
        })
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn health(&self) -> Arc<HealthAggregator> {
        self.health.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Where the health endpoint listens, once bound.
    pub fn health_address(&self) -> Option<SocketAddr> {
        *self.health_address.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn transition(&self, next: LifecycleState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "Ignoring illegal lifecycle transition");
            return;
        }
        self.state.send_replace(next);
        tracing::info!(from = %current, to = %next, "Lifecycle transition");
    }

    /// Run until shutdown and report how it ended.
    pub async fn run(&self, mut signals: mpsc::UnboundedReceiver<TerminationSignal>) -> RunOutcome {
        let aggregator_task = tokio::spawn(self.health.clone().run(self.shutdown.subscribe()));

        let server_task = match self.spawn_health_server().await {
            Ok(task) => task,
            Err(e) => return self.fail(e, &mut signals, vec![aggregator_task]).await,
        };
        let mut background = vec![aggregator_task];
        background.extend(server_task);

        match self.start_up(&mut signals).await {
            Ok(()) => {}
            Err(Abort::Signal(signal)) => {
                tracing::info!(signal = %signal, state = %self.state(), "Termination requested during startup");
                return self.drain(&mut signals, background).await;
            }
            Err(Abort::Error(e)) => return self.fail(e, &mut signals, background).await,
        }

        match self.supervise(&mut signals).await {
            Ok(signal) => {
                tracing::info!(signal = %signal, "Shutting down");
                self.drain(&mut signals, background).await
            }
            Err(e) => self.fail(e, &mut signals, background).await,
        }
    }

    async fn spawn_health_server(&self) -> Result<Option<JoinHandle<()>>, StartupError> {
        if !self.config.health.server_enabled {
            return Ok(None);
        }

        let address = self.config.health.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address: address.clone(), source })?;
        *self.health_address.lock().unwrap_or_else(|p| p.into_inner()) = listener.local_addr().ok();

        let server = HealthServer::new(self.health.clone(), self.state.subscribe());
        let shutdown = self.shutdown.subscribe();
        Ok(Some(tokio::spawn(async move {
            if let Err(e) = server.run(listener, shutdown).await {
                tracing::error!(error = %e, "Health server failed");
            }
        })))
    }

    async fn start_up(&self, signals: &mut mpsc::UnboundedReceiver<TerminationSignal>) -> Result<(), Abort> {
        self.establish_tunnel(signals).await?;

        self.transition(LifecycleState::ServicesStarting);
        let skipped = interruptible(self.supervisor.start_all(), signals)
            .await?
            .map_err(startup_error)?;
        if !skipped.is_empty() {
            tracing::warn!(roles = ?skipped, "Optional roles skipped");
        }

        let timeout = Duration::from_secs(self.config.health.ready_timeout_secs);
        let ready = self.health.wait_until_ready(timeout);
        let failed = self.first_failure();
        let outcome = interruptible(
            async {
                tokio::select! {
                    result = ready => result.map_err(|_| StartupError::NotReady {
                        timeout,
                        unready: self
                            .health
                            .current_status()
                            .unready_roles()
                            .into_iter()
                            .map(str::to_string)
                            .collect(),
                    }),
                    role = failed => Err(StartupError::RestartBudget { role }),
                }
            },
            signals,
        )
        .await?;
        outcome?;

        self.transition(LifecycleState::Running);
        Ok(())
    }

    async fn establish_tunnel(&self, signals: &mut mpsc::UnboundedReceiver<TerminationSignal>) -> Result<(), Abort> {
        let lifecycle = &self.config.lifecycle;
        let backoff = Backoff::from_millis(lifecycle.tunnel_backoff_base_ms, lifecycle.tunnel_backoff_cap_ms);
        let max_attempts = lifecycle.tunnel_max_attempts.max(1);
        let mut attempt = 0;

        let handle = loop {
            attempt += 1;

            self.transition(LifecycleState::ResolvingSecrets);
            let credentials = self.resolver.resolve(self.config.environment)?;

            self.transition(LifecycleState::TunnelStarting);
            match self.tunnel.bring_up(&self.tunnel_config, credentials).await {
                Ok(handle) => break handle,
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff.delay_with_jitter(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Tunnel bring-up failed, retrying"
                    );
                    interruptible(time::sleep(delay), signals).await?;
                }
                Err(source) => {
                    return Err(Abort::Error(StartupError::Tunnel {
                        attempts: attempt,
                        source,
                    }))
                }
            }
        };

        let handle = Arc::new(handle);
        self.health
            .set_tunnel_probe(Some(Arc::new(self.tunnel.status_probe(&handle))));
        *self.tunnel_handle.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    /// Running phase: wait for a signal, handling budget exhaustion meanwhile.
    async fn supervise(
        &self,
        signals: &mut mpsc::UnboundedReceiver<TerminationSignal>,
    ) -> Result<TerminationSignal, StartupError> {
        let transitions = self.supervisor.observe();
        tokio::pin!(transitions);

        loop {
            tokio::select! {
                Some(signal) = signals.recv() => return Ok(signal),
                Some(handle) = transitions.next() => {
                    if handle.state != ProcessState::Failed {
                        continue;
                    }
                    let optional = self
                        .supervisor
                        .role(&handle.role)
                        .map(|role| role.optional)
                        .unwrap_or(false);

                    match self.config.lifecycle.on_budget_exhausted {
                        BudgetPolicy::FailFast if !optional => {
                            return Err(StartupError::RestartBudget { role: handle.role });
                        }
                        _ => {
                            tracing::error!(role = %handle.role, restart_count = handle.restart_count, "Role failed, system degraded");
                            self.transition(LifecycleState::Degraded);
                        }
                    }
                }
                else => std::future::pending::<()>().await,
            }
        }
    }

    /// Resolves with the name of the first required role to fail.
    async fn first_failure(&self) -> String {
        let transitions = self.supervisor.observe();
        tokio::pin!(transitions);
        while let Some(handle) = transitions.next().await {
            if handle.state != ProcessState::Failed {
                continue;
            }
            let optional = self
                .supervisor
                .role(&handle.role)
                .map(|role| role.optional)
                .unwrap_or(false);
            if !optional {
                return handle.role;
            }
        }
        std::future::pending().await
    }

    async fn drain(
        &self,
        signals: &mut mpsc::UnboundedReceiver<TerminationSignal>,
        background: Vec<JoinHandle<()>>,
    ) -> RunOutcome {
        self.transition(LifecycleState::Draining);
        self.clean_up(signals, background).await;
        self.transition(LifecycleState::Stopped);
        tracing::info!("Shutdown complete");

        RunOutcome {
            state: LifecycleState::Stopped,
            exit_code: ExitCode::Clean,
            error: None,
        }
    }

    async fn fail(
        &self,
        error: StartupError,
        signals: &mut mpsc::UnboundedReceiver<TerminationSignal>,
        background: Vec<JoinHandle<()>>,
    ) -> RunOutcome {
        error.report().log();
        self.clean_up(signals, background).await;
        self.transition(LifecycleState::Fatal);

        RunOutcome {
            state: LifecycleState::Fatal,
            exit_code: error.exit_code(),
            error: Some(error),
        }
    }

    /// Stop roles in reverse start order, tear down the tunnel, stop background tasks.
    async fn clean_up(
        &self,
        signals: &mut mpsc::UnboundedReceiver<TerminationSignal>,
        background: Vec<JoinHandle<()>>,
    ) {
        let stop_all = self.supervisor.stop_all();
        tokio::pin!(stop_all);
        loop {
            tokio::select! {
                _ = &mut stop_all => break,
                Some(signal) = signals.recv() => {
                    tracing::warn!(signal = %signal, "Additional termination signal, escalating");
                    self.supervisor.escalate();
                }
            }
        }

        let handle = self.tunnel_handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            self.health.set_tunnel_probe(None);
            if let Err(e) = self.tunnel.tear_down(&handle).await {
                tracing::error!(interface = %handle.interface(), error = %e, "Tunnel teardown failed");
            }
        }

        self.shutdown.trigger();
        for task in background {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

/// A dependency that burned its restart budget is reported as its own
/// budget failure, not as a fault of the role waiting on it.
fn startup_error(error: SupervisorError) -> StartupError {
    match error {
        SupervisorError::DependencyFailed {
            dependency,
            state: ProcessState::Failed,
            ..
        } => StartupError::RestartBudget { role: dependency },
        other => other.into(),
    }
}

/// Run `future` unless a termination signal arrives first.
async fn interruptible<F: Future>(
    future: F,
    signals: &mut mpsc::UnboundedReceiver<TerminationSignal>,
) -> Result<F::Output, Abort> {
    tokio::select! {
        output = future => Ok(output),
        Some(signal) = signals.recv() => Err(Abort::Signal(signal)),
    }
}
