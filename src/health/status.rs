//! Composite health snapshot.

use serde::Serialize;

use crate::supervisor::handle::now_ms;
use crate::supervisor::ProcessState;

/// Readiness of one role as of the last aggregation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleHealth {
    pub name: String,
    pub state: ProcessState,
    /// Supervisor reports ready and the probe passed this cycle.
    pub ready: bool,
    /// Optional roles do not gate overall readiness.
    pub optional: bool,
    pub pid: Option<u32>,
    pub restart_count: u32,
}

/// Result of one aggregation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub ready: bool,
    pub tunnel_ready: bool,
    pub roles: Vec<RoleHealth>,
    pub updated_at_ms: u64,
}

impl HealthStatus {
    /// Before the first cycle: nothing is ready.
    pub fn initial() -> Self {
        Self {
            ready: false,
            tunnel_ready: false,
            roles: Vec::new(),
            updated_at_ms: now_ms(),
        }
    }

    /// Overall-ready: tunnel up and every required role ready.
    pub fn compose(tunnel_ready: bool, roles: Vec<RoleHealth>) -> Self {
        let ready = tunnel_ready && roles.iter().all(|role| role.ready || role.optional);
        Self {
            ready,
            tunnel_ready,
            roles,
            updated_at_ms: now_ms(),
        }
    }

    pub fn role(&self, name: &str) -> Option<&RoleHealth> {
        self.roles.iter().find(|role| role.name == name)
    }

    /// Names of required roles that are not ready.
    pub fn unready_roles(&self) -> Vec<&str> {
        self.roles
            .iter()
            .filter(|role| !role.ready && !role.optional)
            .map(|role| role.name.as_str())
            .collect()
    }
}
