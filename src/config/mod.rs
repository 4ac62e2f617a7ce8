//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, apply ENVIRONMENT override)
//!     → validation.rs (semantic checks)
//!     → SupervisorConfig (validated, immutable)
//!     → handed by value to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the role set is fixed for the process lifetime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Secret values never live in the config file, only the variable names

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BudgetPolicy, DriverKind, Environment, HealthConfig, LifecycleConfig, LogFormat,
    LogSinkConfig, ObservabilityConfig, ProbeConfig, RestartConfig, RestartPolicy, RoleConfig,
    SecretsConfig, SupervisorConfig, SupervisorSection, TunnelSection,
};
