//! Startup and runtime error taxonomy.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::secrets::SecretError;
use crate::supervisor::handle::now_ms;
use crate::supervisor::SupervisorError;
use crate::tunnel::TunnelError;

/// How an error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Bad or missing secret, malformed role registration. Fatal, never retried.
    Configuration,
    /// Retried with backoff (tunnel handshake timeout).
    TransientNetwork,
    /// Handled by the role's restart policy until the budget runs out.
    ProcessExit,
    /// Fatal unless the waiting role is optional.
    DependencyTimeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::TransientNetwork => "transient-network",
            ErrorKind::ProcessExit => "process-exit",
            ErrorKind::DependencyTimeout => "dependency-timeout",
        })
    }
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Clean = 0,
    Configuration = 1,
    Tunnel = 2,
    RestartBudget = 3,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Anything that ends the lifecycle in `Fatal`.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("tunnel not established after {attempts} attempt(s): {source}")]
    Tunnel {
        attempts: u32,
        #[source]
        source: TunnelError,
    },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("services not ready after {timeout:?} (waiting on: {})", .unready.join(", "))]
    NotReady { timeout: Duration, unready: Vec<String> },

    #[error("role '{role}' exhausted its restart budget")]
    RestartBudget { role: String },

    #[error("cannot bind health endpoint on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StartupError::Config(_) | StartupError::Secret(_) | StartupError::Bind { .. } => ErrorKind::Configuration,
            StartupError::Tunnel { source, .. } if source.is_transient() => ErrorKind::TransientNetwork,
            StartupError::Tunnel { .. } => ErrorKind::Configuration,
            StartupError::Supervisor(e) if e.is_dependency() => ErrorKind::DependencyTimeout,
            StartupError::Supervisor(SupervisorError::Spawn { .. }) => ErrorKind::ProcessExit,
            StartupError::Supervisor(_) => ErrorKind::Configuration,
            StartupError::NotReady { .. } => ErrorKind::DependencyTimeout,
            StartupError::RestartBudget { .. } => ErrorKind::ProcessExit,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            StartupError::Tunnel { source, .. } if source.is_configuration() => ExitCode::Configuration,
            StartupError::Tunnel { .. } => ExitCode::Tunnel,
            StartupError::RestartBudget { .. } => ExitCode::RestartBudget,
            _ => ExitCode::Configuration,
        }
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            StartupError::Supervisor(e) => e.role(),
            StartupError::RestartBudget { role } => Some(role),
            _ => None,
        }
    }

    /// Serializable record of this error. Carries no secret values.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            role: self.role().map(str::to_string),
            message: self.to_string(),
            timestamp_ms: now_ms(),
        }
    }
}

/// What gets logged (and could be shipped) for a fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub role: Option<String>,
    pub message: String,
    pub timestamp_ms: u64,
}

impl ErrorReport {
    pub fn log(&self) {
        tracing::error!(
            kind = %self.kind,
            role = self.role.as_deref().unwrap_or("-"),
            timestamp_ms = self.timestamp_ms,
            error = %self.message,
            "Fatal error"
        );
    }
}
