//! The process supervisor.

use futures_util::stream::{self, Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use dashmap::DashMap;

use crate::config::{SecretsConfig, SupervisorConfig};
use crate::observability::metrics;
use crate::supervisor::handle::{ProcessHandle, ProcessState};
use crate::supervisor::monitor::{Control, Monitor};
use crate::supervisor::order::{topological_order, OrderError};
use crate::supervisor::restart::RestartLimits;
use crate::supervisor::role::ServiceRole;

/// Capacity of the transition channel. Slow observers past this lag and skip.
const TRANSITION_CAPACITY: usize = 256;

/// Errors from registering or starting roles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("role '{0}' is already registered")]
    DuplicateRole(String),

    #[error("cannot register role '{0}' after start activity has begun")]
    RegistrationClosed(String),

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("role '{role}' has already been started")]
    AlreadyStarted { role: String },

    #[error("role '{role}' timed out after {timeout_secs}s waiting for '{dependency}' to become ready")]
    DependencyTimeout {
        role: String,
        dependency: String,
        timeout_secs: u64,
    },

    #[error("role '{role}' cannot start: dependency '{dependency}' is {state}")]
    DependencyFailed {
        role: String,
        dependency: String,
        state: ProcessState,
    },

    #[error("failed to spawn role '{role}': {reason}")]
    Spawn { role: String, reason: String },

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl SupervisorError {
    /// The role this error is about, when there is one.
    pub fn role(&self) -> Option<&str> {
        match self {
            SupervisorError::DuplicateRole(role)
            | SupervisorError::RegistrationClosed(role)
            | SupervisorError::UnknownRole(role) => Some(role),
            SupervisorError::AlreadyStarted { role }
            | SupervisorError::DependencyTimeout { role, .. }
            | SupervisorError::DependencyFailed { role, .. }
            | SupervisorError::Spawn { role, .. } => Some(role),
            SupervisorError::Order(OrderError::UnknownDependency { role, .. }) => Some(role),
            SupervisorError::Order(OrderError::Cycle(_)) => None,
        }
    }

    /// Dependency errors may be absorbed for optional roles.
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            SupervisorError::DependencyTimeout { .. } | SupervisorError::DependencyFailed { .. }
        )
    }
}

/// Timeouts and limits applied to every role.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub dependency_timeout: Duration,
    pub grace_period: Duration,
    pub readiness_poll: Duration,
    pub probe_timeout: Duration,
    pub restart: RestartLimits,
    /// Variables removed from every child's environment.
    pub scrubbed_env: Vec<String>,
}

impl SupervisorSettings {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            dependency_timeout: Duration::from_secs(config.supervisor.dependency_timeout_secs),
            grace_period: Duration::from_secs(config.supervisor.grace_period_secs),
            readiness_poll: Duration::from_millis(config.supervisor.readiness_poll_ms.max(1)),
            probe_timeout: Duration::from_millis(config.health.probe_timeout_ms),
            restart: RestartLimits::from_config(&config.restart),
            scrubbed_env: secret_variables(&config.secrets),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

fn secret_variables(secrets: &SecretsConfig) -> Vec<String> {
    vec![
        secrets.dev_private_key_var.clone(),
        secrets.dev_preshared_key_var.clone(),
        secrets.prod_private_key_var.clone(),
        secrets.prod_preshared_key_var.clone(),
    ]
}

struct RoleSlot {
    role: Arc<ServiceRole>,
    state: Arc<watch::Sender<ProcessHandle>>,
    claimed: AtomicBool,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    /// Registration order.
    roles: RwLock<Vec<Arc<RoleSlot>>>,
    slots: DashMap<String, Arc<RoleSlot>>,
    started: AtomicBool,
    settings: SupervisorSettings,
    transitions: broadcast::Sender<ProcessHandle>,
    force: watch::Sender<bool>,
    start_order: Mutex<Vec<String>>,
}

/// Registry and supervisor of service roles.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

/// A dependency's name and a receiver for its handle.
pub(crate) type DependencyWatch = (String, watch::Receiver<ProcessHandle>);

/// Wait until every dependency is ready at the same moment.
///
/// A dependency that is `failed` or `stopped` ends the wait at once. Used
/// before the first spawn and again before every respawn.
pub(crate) async fn wait_for_dependencies(
    role: &str,
    dependencies: &mut [DependencyWatch],
    timeout: Duration,
) -> Result<(), SupervisorError> {
    if dependencies.is_empty() {
        return Ok(());
    }
    let deadline = Instant::now() + timeout;

    loop {
        for (dependency, rx) in dependencies.iter_mut() {
            let waited = time::timeout_at(deadline, async {
                loop {
                    let state = rx.borrow_and_update().state;
                    match state {
                        ProcessState::Ready => return Ok(()),
                        ProcessState::Failed | ProcessState::Stopped => return Err(state),
                        ProcessState::Pending | ProcessState::Starting => {}
                    }
                    if rx.changed().await.is_err() {
                        return Err(ProcessState::Stopped);
                    }
                }
            })
            .await;

            match waited {
                Ok(Ok(())) => {}
                Ok(Err(state)) => {
                    return Err(SupervisorError::DependencyFailed {
                        role: role.to_string(),
                        dependency: dependency.clone(),
                        state,
                    });
                }
                Err(_) => {
                    tracing::warn!(role = %role, dependency = %dependency, timeout_secs = timeout.as_secs(), "Dependency not ready in time");
                    return Err(SupervisorError::DependencyTimeout {
                        role: role.to_string(),
                        dependency: dependency.clone(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
            }
        }

        // A dependency may have dropped back to starting while we waited on another.
        if dependencies.iter().all(|(_, rx)| rx.borrow().is_ready()) {
            return Ok(());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let (force, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                roles: RwLock::new(Vec::new()),
                slots: DashMap::new(),
                started: AtomicBool::new(false),
                settings,
                transitions,
                force,
                start_order: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Add a role. Only allowed before the first `start`.
    pub fn register(&self, role: ServiceRole) -> Result<(), SupervisorError> {
        let mut roles = self.inner.roles.write().unwrap_or_else(|p| p.into_inner());
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(SupervisorError::RegistrationClosed(role.name));
        }
        if self.inner.slots.contains_key(&role.name) {
            return Err(SupervisorError::DuplicateRole(role.name));
        }

        let (state, _) = watch::channel(ProcessHandle::pending(role.name.clone()));
        let slot = Arc::new(RoleSlot {
            role: Arc::new(role),
            state: Arc::new(state),
            claimed: AtomicBool::new(false),
            control: Mutex::new(None),
            task: Mutex::new(None),
        });

        tracing::debug!(role = %slot.role.name, depends_on = ?slot.role.depends_on, "Role registered");
        metrics::record_role_state(&slot.role.name, ProcessState::Pending);
        self.inner.slots.insert(slot.role.name.clone(), slot.clone());
        roles.push(slot);
        Ok(())
    }

    /// Start one role once all of its dependencies are ready.
    ///
    /// Blocks until dependencies resolve or the dependency timeout elapses,
    /// then returns as soon as the process is spawned. Readiness of the role
    /// itself is reported through `observe`.
    pub async fn start(&self, name: &str) -> Result<(), SupervisorError> {
        let slot = self.slot(name).ok_or_else(|| SupervisorError::UnknownRole(name.to_string()))?;
        {
            let _roles = self.inner.roles.write().unwrap_or_else(|p| p.into_inner());
            self.inner.started.store(true, Ordering::SeqCst);
        }

        if slot.claimed.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyStarted { role: name.to_string() });
        }

        let gated = match self.dependency_receivers(&slot.role) {
            Ok(mut dependencies) => {
                let timeout = self.inner.settings.dependency_timeout;
                match wait_for_dependencies(&slot.role.name, &mut dependencies, timeout).await {
                    Ok(()) => Ok(dependencies),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        let dependencies = match gated {
            Ok(dependencies) => dependencies,
            Err(e) => {
                slot.claimed.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        lock(&self.inner.start_order).push(name.to_string());

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (spawned_tx, spawned_rx) = oneshot::channel();
        let monitor = Monitor {
            role: slot.role.clone(),
            settings: self.inner.settings.clone(),
            state: slot.state.clone(),
            transitions: self.inner.transitions.clone(),
            control: control_rx,
            force: self.inner.force.subscribe(),
            spawned: Some(spawned_tx),
            dependencies,
        };

        *lock(&slot.control) = Some(control_tx);
        *lock(&slot.task) = Some(tokio::spawn(monitor.run()));

        match spawned_rx.await {
            Ok(Ok(pid)) => {
                tracing::info!(role = %name, pid, "Role started");
                Ok(())
            }
            Ok(Err(reason)) => Err(SupervisorError::Spawn {
                role: name.to_string(),
                reason,
            }),
            Err(_) => Err(SupervisorError::Spawn {
                role: name.to_string(),
                reason: "monitor task ended before spawning".to_string(),
            }),
        }
    }

    /// Subscribe to the state of every dependency of `role`.
    fn dependency_receivers(&self, role: &ServiceRole) -> Result<Vec<DependencyWatch>, SupervisorError> {
        role.depends_on
            .iter()
            .map(|dependency| {
                let slot = self.slot(dependency).ok_or_else(|| {
                    SupervisorError::Order(OrderError::UnknownDependency {
                        role: role.name.clone(),
                        dependency: dependency.clone(),
                    })
                })?;
                Ok((dependency.clone(), slot.state.subscribe()))
            })
            .collect()
    }

    /// Start every role in dependency order.
    ///
    /// Optional roles whose dependencies fail are skipped and returned;
    /// any other error aborts.
    pub async fn start_all(&self) -> Result<Vec<String>, SupervisorError> {
        let roles = self.roles();
        let edges: Vec<(&str, Vec<&str>)> = roles
            .iter()
            .map(|r| (r.name.as_str(), r.depends_on.iter().map(String::as_str).collect()))
            .collect();
        let order = topological_order(&edges)?;
        let mut skipped: Vec<String> = Vec::new();

        for name in order {
            let Some(role) = self.role(&name) else { continue };

            let result = match role.depends_on.iter().find(|d| skipped.contains(*d)) {
                Some(dependency) => Err(SupervisorError::DependencyFailed {
                    role: name.clone(),
                    dependency: dependency.clone(),
                    state: ProcessState::Pending,
                }),
                None => self.start(&name).await,
            };

            match result {
                Ok(()) => {}
                Err(e) if role.optional && e.is_dependency() => {
                    tracing::warn!(role = %name, error = %e, "Optional role skipped");
                    skipped.push(name);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(skipped)
    }

    /// Stop one role: SIGTERM, grace period, then SIGKILL. Always succeeds.
    pub async fn stop(&self, name: &str) {
        let Some(slot) = self.slot(name) else {
            tracing::warn!(role = %name, "Stop requested for unknown role");
            return;
        };

        let control = lock(&slot.control).take();
        let task = lock(&slot.task).take();

        if let Some(control) = control {
            let _ = control.send(Control::Stop);
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(role = %name, error = %e, "Monitor task ended abnormally");
            }
        }
        slot.claimed.store(false, Ordering::SeqCst);
    }

    /// Stop every started role, in reverse start order, one at a time.
    pub async fn stop_all(&self) {
        let order: Vec<String> = lock(&self.inner.start_order).drain(..).rev().collect();
        let mut seen = std::collections::HashSet::new();
        for name in order {
            if seen.insert(name.clone()) {
                tracing::info!(role = %name, "Stopping role");
                self.stop(&name).await;
            }
        }
    }

    /// Skip remaining grace periods: any role still terminating is killed now.
    pub fn escalate(&self) {
        tracing::warn!("Escalating shutdown, force-terminating remaining processes");
        self.inner.force.send_replace(true);
    }

    /// State transitions of every role.
    ///
    /// Starts with the current snapshot of each role in registration order,
    /// then yields each transition as it happens. Every call returns a fresh
    /// sequence.
    pub fn observe(&self) -> impl Stream<Item = ProcessHandle> + Send + 'static {
        let rx = self.inner.transitions.subscribe();
        let initial = self.snapshots();

        let updates = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(handle) => return Some((handle, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Transition observer lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        stream::iter(initial).chain(updates)
    }

    pub fn snapshot(&self, name: &str) -> Option<ProcessHandle> {
        self.slot(name).map(|slot| slot.state.borrow().clone())
    }

    /// Current handle of every role in registration order.
    pub fn snapshots(&self) -> Vec<ProcessHandle> {
        self.slots_in_order()
            .iter()
            .map(|slot| slot.state.borrow().clone())
            .collect()
    }

    pub fn role(&self, name: &str) -> Option<Arc<ServiceRole>> {
        self.slot(name).map(|slot| slot.role.clone())
    }

    /// Registered roles in registration order.
    pub fn roles(&self) -> Vec<Arc<ServiceRole>> {
        self.slots_in_order().iter().map(|slot| slot.role.clone()).collect()
    }

    /// Names of roles in the order they were started.
    pub fn start_order(&self) -> Vec<String> {
        lock(&self.inner.start_order).clone()
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    fn slot(&self, name: &str) -> Option<Arc<RoleSlot>> {
        self.inner.slots.get(name).map(|entry| entry.value().clone())
    }

    fn slots_in_order(&self) -> Vec<Arc<RoleSlot>> {
        self.inner.roles.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorSettings::default())
    }
}
