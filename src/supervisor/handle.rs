//! Observable per-role process state.

use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Where a role is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Registered, not yet started.
    Pending,
    /// Spawned (or waiting to respawn) but not yet ready.
    Starting,
    Ready,
    /// Gave up: restart budget exhausted or spawn failed.
    Failed,
    /// Exited and will not be restarted.
    Stopped,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Pending => "pending",
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Failed => "failed",
            ProcessState::Stopped => "stopped",
        }
    }

    /// Failed and Stopped are terminal for the current supervision run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Failed | ProcessState::Stopped)
    }

    /// Numeric gauge value.
    pub fn as_gauge(&self) -> f64 {
        match self {
            ProcessState::Pending => 0.0,
            ProcessState::Starting => 1.0,
            ProcessState::Ready => 2.0,
            ProcessState::Failed => 3.0,
            ProcessState::Stopped => 4.0,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one role's process.
///
/// A role has at most one live instance; `instance` changes on every spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    pub role: String,
    pub instance: Option<Uuid>,
    pub pid: Option<u32>,
    /// Unix epoch milliseconds of the current instance's spawn.
    pub started_at_ms: Option<u64>,
    pub state: ProcessState,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub updated_at_ms: u64,
}

impl ProcessHandle {
    pub fn pending(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            instance: None,
            pid: None,
            started_at_ms: None,
            state: ProcessState::Pending,
            restart_count: 0,
            last_exit_code: None,
            updated_at_ms: now_ms(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ProcessState::Ready
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
