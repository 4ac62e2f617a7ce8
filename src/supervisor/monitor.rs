//! Per-role monitoring task.
//!
//! # Responsibilities
//! - Spawn the role's process with a scrubbed environment
//! - Poll the readiness probe until the instance first reports ready
//! - Apply the restart policy when the process exits
//! - Terminate gracefully on request, escalating to SIGKILL
//!
//! # Data Flow
//! ```text
//! spawn → Starting ──probe ok──→ Ready
//!            │                     │
//!            └──────── exit ───────┘
//!                       │
//!          RestartTracker::on_exit
//!      ┌────────────┼─────────────┐
//!   Restart       Finish        GiveUp
//!   (backoff,     → Stopped     → Failed
//!    dependencies
//!    ready again,
//!    respawn)
//! ```
//!
//! The task is the only writer of its role's `ProcessHandle`.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time;
use uuid::Uuid;

use crate::health::probe::check_with_timeout;
use crate::observability::metrics;
use crate::supervisor::handle::{now_ms, ProcessHandle, ProcessState};
use crate::supervisor::restart::{RestartDecision, RestartTracker};
use crate::supervisor::role::{LogSink, ServiceRole};
use crate::supervisor::supervisor::{wait_for_dependencies, DependencyWatch};
use crate::supervisor::SupervisorSettings;

/// Commands from the supervisor to a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Stop,
}

enum Event {
    Exited(io::Result<ExitStatus>),
    Stop,
    Poll,
}

pub(crate) struct Monitor {
    pub role: Arc<ServiceRole>,
    pub settings: SupervisorSettings,
    pub state: Arc<watch::Sender<ProcessHandle>>,
    pub transitions: broadcast::Sender<ProcessHandle>,
    pub control: mpsc::UnboundedReceiver<Control>,
    pub force: watch::Receiver<bool>,
    /// Resolved with the first spawn's pid, or the spawn error.
    pub spawned: Option<oneshot::Sender<Result<u32, String>>>,
    /// Re-checked before every respawn.
    pub dependencies: Vec<DependencyWatch>,
}

impl Monitor {
    pub async fn run(mut self) {
        let mut tracker = RestartTracker::new(self.settings.restart);

        loop {
            let mut child = match self.spawn() {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!(role = %self.role.name, command = %self.role.command, error = %e, "Failed to spawn process");
                    self.publish(|h| {
                        h.state = ProcessState::Failed;
                        h.pid = None;
                    });
                    if let Some(tx) = self.spawned.take() {
                        let _ = tx.send(Err(e.to_string()));
                    }
                    return;
                }
            };

            let pid = child.id();
            let mut ready_at = None;
            self.publish(|h| {
                h.instance = Some(Uuid::new_v4());
                h.pid = pid;
                h.started_at_ms = Some(now_ms());
                h.state = ProcessState::Starting;
            });
            tracing::info!(role = %self.role.name, pid = ?pid, "Process spawned");
            if let Some(tx) = self.spawned.take() {
                let _ = tx.send(Ok(pid.unwrap_or_default()));
            }

            let status = match self.supervise(&mut child, &mut ready_at).await {
                Some(status) => status,
                None => {
                    let status = self.terminate(&mut child).await;
                    self.publish(|h| {
                        h.state = ProcessState::Stopped;
                        h.pid = None;
                        h.last_exit_code = status.map(exit_code);
                    });
                    tracing::info!(role = %self.role.name, "Process stopped");
                    return;
                }
            };

            let (success, code) = match &status {
                Ok(status) => (status.success(), Some(exit_code(*status))),
                Err(e) => {
                    tracing::error!(role = %self.role.name, error = %e, "Failed to wait on process");
                    (false, None)
                }
            };

            let ready_for = ready_at.map(|at: Instant| at.elapsed());
            match tracker.on_exit(self.role.restart, success, ready_for, Instant::now()) {
                RestartDecision::Restart(delay) => {
                    self.publish(|h| {
                        h.state = ProcessState::Starting;
                        h.pid = None;
                        h.last_exit_code = code;
                        h.restart_count += 1;
                    });
                    metrics::record_restart(&self.role.name);
                    tracing::warn!(
                        role = %self.role.name,
                        exit_code = ?code,
                        delay_ms = delay.as_millis() as u64,
                        "Process exited, restarting after backoff"
                    );

                    let stop = tokio::select! {
                        _ = time::sleep(delay) => false,
                        _ = self.control.recv() => true,
                    };
                    if stop {
                        self.publish(|h| h.state = ProcessState::Stopped);
                        tracing::info!(role = %self.role.name, "Stopped during restart backoff");
                        return;
                    }

                    if !self.gate_respawn().await {
                        return;
                    }
                }
                RestartDecision::Finish => {
                    self.publish(|h| {
                        h.state = ProcessState::Stopped;
                        h.pid = None;
                        h.last_exit_code = code;
                    });
                    tracing::info!(role = %self.role.name, exit_code = ?code, "Process exited, not restarting");
                    return;
                }
                RestartDecision::GiveUp => {
                    self.publish(|h| {
                        h.state = ProcessState::Failed;
                        h.pid = None;
                        h.last_exit_code = code;
                    });
                    tracing::error!(
                        role = %self.role.name,
                        exit_code = ?code,
                        restart_count = self.state.borrow().restart_count,
                        "Restart budget exhausted, role failed"
                    );
                    return;
                }
            }
        }
    }

    /// Hold a respawn until every dependency is ready again.
    ///
    /// Returns `false` when the monitor is done: stopped while waiting, or a
    /// dependency failed or stayed unready past the dependency timeout.
    async fn gate_respawn(&mut self) -> bool {
        if self.dependencies.is_empty() {
            return true;
        }

        let timeout = self.settings.dependency_timeout;
        let gate = tokio::select! {
            result = wait_for_dependencies(&self.role.name, &mut self.dependencies, timeout) => Some(result),
            _ = self.control.recv() => None,
        };

        match gate {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                self.publish(|h| h.state = ProcessState::Failed);
                tracing::error!(role = %self.role.name, error = %e, "Dependency lost during restart, role failed");
                false
            }
            None => {
                self.publish(|h| h.state = ProcessState::Stopped);
                tracing::info!(role = %self.role.name, "Stopped while waiting for dependencies");
                false
            }
        }
    }

    /// Watch a live instance. `None` means a stop was requested.
    async fn supervise(&mut self, child: &mut Child, ready_at: &mut Option<Instant>) -> Option<io::Result<ExitStatus>> {
        let mut poll = time::interval(self.settings.readiness_poll);
        poll.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut ready = false;

        loop {
            let event = tokio::select! {
                status = child.wait() => Event::Exited(status),
                _ = self.control.recv() => Event::Stop,
                _ = poll.tick(), if !ready => Event::Poll,
            };

            match event {
                Event::Exited(status) => return Some(status),
                Event::Stop => return None,
                Event::Poll => {
                    if check_with_timeout(self.role.probe.as_ref(), self.settings.probe_timeout).await {
                        ready = true;
                        *ready_at = Some(Instant::now());
                        self.publish(|h| h.state = ProcessState::Ready);
                        tracing::info!(role = %self.role.name, probe = %self.role.probe.describe(), "Role ready");
                    }
                }
            }
        }
    }

    /// SIGTERM, then SIGKILL after the grace period or on escalation.
    async fn terminate(&mut self, child: &mut Child) -> Option<ExitStatus> {
        let Some(pid) = child.id() else {
            return child.wait().await.ok();
        };
        let grace = self.role.grace_period.unwrap_or(self.settings.grace_period);

        // SAFETY: `pid` is our own child and has not been reaped (id() is
        // Some), so it cannot have been recycled for another process.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(role = %self.role.name, pid, error = %io::Error::last_os_error(), "SIGTERM failed");
        }

        let mut force = self.force.clone();
        let escalated = async move { force.wait_for(|forced| *forced).await.is_ok() };
        let reason = tokio::select! {
            status = child.wait() => return status.ok(),
            _ = time::sleep(grace) => "grace period elapsed",
            true = escalated => "shutdown escalated",
        };

        tracing::warn!(
            role = %self.role.name,
            pid,
            grace_secs = grace.as_secs_f64(),
            reason,
            "Process did not exit after SIGTERM, force-terminating"
        );
        if let Err(e) = child.kill().await {
            tracing::error!(role = %self.role.name, pid, error = %e, "Force-termination failed");
        }
        child.wait().await.ok()
    }

    fn spawn(&self) -> io::Result<Child> {
        let role = &self.role;
        let mut command = Command::new(&role.command);
        command.args(&role.args).stdin(Stdio::null()).kill_on_drop(true);

        for variable in &self.settings.scrubbed_env {
            command.env_remove(variable);
        }
        command.envs(&role.env);

        if let Some(dir) = &role.working_dir {
            command.current_dir(dir);
        }

        match &role.log {
            LogSink::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            LogSink::Null => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
            LogSink::File(path) => {
                let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
                let stderr = file.try_clone()?;
                command.stdout(Stdio::from(file)).stderr(Stdio::from(stderr));
            }
        }

        command.spawn()
    }

    fn publish(&self, update: impl FnOnce(&mut ProcessHandle)) {
        let mut snapshot = None;
        self.state.send_modify(|handle| {
            update(handle);
            handle.updated_at_ms = now_ms();
            snapshot = Some(handle.clone());
        });

        if let Some(handle) = snapshot {
            metrics::record_role_state(&handle.role, handle.state);
            tracing::debug!(role = %handle.role, state = %handle.state, "Role state changed");
            let _ = self.transitions.send(handle);
        }
    }
}

/// Exit code, or 128 + signal number for signal deaths.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}
