//! Lifecycle states.

use serde::Serialize;
use std::fmt;

/// Where the whole system is in its lifecycle.
///
/// ```text
/// Init → ResolvingSecrets → TunnelStarting → ServicesStarting → Running → Draining → Stopped
///                                                                  │  ↑        ↑
///                                                                  ↓  │        │
///                                                                Degraded ─────┘
/// Fatal is reachable from any non-terminal state.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Init,
    ResolvingSecrets,
    TunnelStarting,
    ServicesStarting,
    Running,
    /// Up, but a role exhausted its restart budget.
    Degraded,
    Draining,
    Stopped,
    Fatal,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Init => "init",
            LifecycleState::ResolvingSecrets => "resolving-secrets",
            LifecycleState::TunnelStarting => "tunnel-starting",
            LifecycleState::ServicesStarting => "services-starting",
            LifecycleState::Running => "running",
            LifecycleState::Degraded => "degraded",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Fatal => "fatal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Fatal)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Fatal {
            return true;
        }

        matches!(
            (self, next),
            (Init, ResolvingSecrets)
                | (ResolvingSecrets, TunnelStarting)
                // Tunnel retries re-resolve credentials for every attempt.
                | (TunnelStarting, ResolvingSecrets)
                | (TunnelStarting, ServicesStarting)
                | (ServicesStarting, Running)
                | (Running, Degraded)
                | (Degraded, Running)
                | (Running, Draining)
                | (Degraded, Draining)
                // A termination signal during startup drains what was started.
                | (ResolvingSecrets, Draining)
                | (TunnelStarting, Draining)
                | (ServicesStarting, Draining)
                | (Draining, Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
