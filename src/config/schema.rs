//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the supervisor.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Root configuration for the supervisor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Which credential set to use (`dev` or `prod`).
    pub environment: Environment,

    /// Names of the variables holding tunnel key material.
    pub secrets: SecretsConfig,

    /// Tunnel interface and peer settings.
    pub tunnel: TunnelSection,

    /// Supervised service roles, in declaration order.
    pub roles: Vec<RoleConfig>,

    /// Restart policy tuning shared by every role.
    pub restart: RestartConfig,

    /// Process supervision timeouts.
    pub supervisor: SupervisorSection,

    /// Health aggregation and the health endpoint.
    pub health: HealthConfig,

    /// Lifecycle controller policy.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Deployment environment selecting a credential set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment '{}', expected 'dev' or 'prod'", other)),
        }
    }
}

/// Variable names for each environment's key pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub dev_private_key_var: String,
    pub dev_preshared_key_var: String,
    pub prod_private_key_var: String,
    pub prod_preshared_key_var: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            dev_private_key_var: "WG_PRIVATE_KEY_DEV".to_string(),
            dev_preshared_key_var: "WG_PRESHARED_KEY_DEV".to_string(),
            prod_private_key_var: "WG_PRIVATE_KEY_PROD".to_string(),
            prod_preshared_key_var: "WG_PRESHARED_KEY_PROD".to_string(),
        }
    }
}

/// Which link driver configures the tunnel interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    /// Kernel WireGuard via `ip` and `wg`.
    #[default]
    Wireguard,
    /// Record operations only. For unprivileged local runs.
    DryRun,
}

/// Tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelSection {
    pub driver: DriverKind,

    /// Interface name (kernel limit: 15 characters).
    pub interface: String,

    /// Local address on the tunnel, in CIDR notation.
    pub address: String,

    /// Remote endpoint (`host:port`).
    pub endpoint: String,

    /// Remote peer's base64 public key.
    pub peer_public_key: String,

    /// Networks routed through the tunnel, in CIDR notation.
    pub allowed_routes: Vec<String>,

    /// Keepalive interval in seconds (0 disables).
    pub persistent_keepalive_secs: u64,

    /// Deadline for the reachability probe.
    pub handshake_timeout_secs: u64,

    /// Optional `host:port` reached through the tunnel once the handshake completes.
    pub probe_address: Option<String>,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            driver: DriverKind::Wireguard,
            interface: "wg0".to_string(),
            address: "10.8.0.2/32".to_string(),
            endpoint: String::new(),
            peer_public_key: String::new(),
            allowed_routes: Vec::new(),
            persistent_keepalive_secs: 25,
            handshake_timeout_secs: 10,
            probe_address: None,
        }
    }
}

/// Restart behaviour when a role's process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Never,
    #[default]
    OnFailure,
    Always,
}

/// Readiness probe declaration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProbeConfig {
    /// Ready as soon as the process is spawned.
    #[default]
    None,
    /// Ready when a TCP connection succeeds.
    Tcp { address: String },
    /// Ready when a GET returns 2xx.
    Http { url: String },
    /// Ready when the command exits 0.
    Exec { command: Vec<String> },
}

/// Where a role's stdout/stderr go.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LogSinkConfig {
    #[default]
    Inherit,
    Null,
    File { path: String },
}

/// One supervised service role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleConfig {
    /// Unique role identifier.
    pub name: String,

    /// Executable to run.
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Roles that must be ready before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub log: LogSinkConfig,

    /// A dependency timeout on an optional role is logged, not fatal.
    #[serde(default)]
    pub optional: bool,

    /// Overrides `supervisor.grace_period_secs` for this role.
    #[serde(default)]
    pub grace_period_secs: Option<u64>,
}

/// Restart tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub backoff_cap_ms: u64,

    /// A process that ran this long resets its backoff.
    pub healthy_reset_secs: u64,

    /// Maximum restarts inside the rolling window.
    pub max_restarts: u32,

    /// Rolling window length in seconds.
    pub window_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            healthy_reset_secs: 60,
            max_restarts: 5,
            window_secs: 60,
        }
    }
}

/// Process supervision timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorSection {
    /// How long `start` waits for dependencies to become ready.
    pub dependency_timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL.
    pub grace_period_secs: u64,

    /// How often a starting role's probe is retried until first success.
    pub readiness_poll_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            dependency_timeout_secs: 30,
            grace_period_secs: 10,
            readiness_poll_ms: 250,
        }
    }
}

/// Health aggregation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Poll interval in milliseconds.
    pub interval_ms: u64,

    /// A probe slower than this counts as not-ready for the cycle.
    pub probe_timeout_ms: u64,

    /// How long startup waits for the composite signal.
    pub ready_timeout_secs: u64,

    /// Serve the health endpoint.
    pub server_enabled: bool,

    /// Health endpoint bind address.
    pub bind_address: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            probe_timeout_ms: 1_000,
            ready_timeout_secs: 60,
            server_enabled: true,
            bind_address: "0.0.0.0:8079".to_string(),
        }
    }
}

/// What the controller does when a role exhausts its restart budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetPolicy {
    /// Stay up and report unhealthy.
    #[default]
    Degrade,
    /// Drain and exit with code 3.
    FailFast,
}

/// Lifecycle controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Tunnel bring-up attempts before giving up.
    pub tunnel_max_attempts: u32,

    /// Base delay between tunnel attempts in milliseconds.
    pub tunnel_backoff_base_ms: u64,

    /// Maximum delay between tunnel attempts in milliseconds.
    pub tunnel_backoff_cap_ms: u64,

    pub on_budget_exhausted: BudgetPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tunnel_max_attempts: 5,
            tunnel_backoff_base_ms: 1_000,
            tunnel_backoff_cap_ms: 30_000,
            on_budget_exhausted: BudgetPolicy::Degrade,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
