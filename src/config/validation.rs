//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (dependencies name existing roles)
//! - Reject dependency cycles
//! - Validate value ranges and address formats
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SupervisorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{DriverKind, ProbeConfig, SupervisorConfig};
use crate::supervisor::order::{topological_order, OrderError};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("role name must not be empty")]
    EmptyRoleName,

    #[error("role '{0}' is declared more than once")]
    DuplicateRole(String),

    #[error("role '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("role '{role}' depends on unknown role '{dependency}'")]
    UnknownDependency { role: String, dependency: String },

    #[error("dependency cycle through roles: {0}")]
    DependencyCycle(String),

    #[error("role '{role}' has an invalid probe: {reason}")]
    InvalidProbe { role: String, reason: String },

    #[error("tunnel interface name '{0}' must be 1-15 characters")]
    InvalidInterface(String),

    #[error("tunnel endpoint '{0}' must be host:port")]
    InvalidEndpoint(String),

    #[error("'{0}' is not a CIDR block")]
    InvalidCidr(String),

    #[error("tunnel peer public key is required")]
    MissingPeerKey,

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
}

/// Run every semantic check against a parsed configuration.
pub fn validate_config(config: &SupervisorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_roles(config, &mut errors);
    validate_tunnel(config, &mut errors);

    if config.tunnel.handshake_timeout_secs == 0 {
        errors.push(ValidationError::ZeroValue("tunnel.handshake_timeout_secs"));
    }
    if config.lifecycle.tunnel_max_attempts == 0 {
        errors.push(ValidationError::ZeroValue("lifecycle.tunnel_max_attempts"));
    }
    if config.health.interval_ms == 0 {
        errors.push(ValidationError::ZeroValue("health.interval_ms"));
    }
    if config.health.probe_timeout_ms == 0 {
        errors.push(ValidationError::ZeroValue("health.probe_timeout_ms"));
    }
    if config.restart.window_secs == 0 {
        errors.push(ValidationError::ZeroValue("restart.window_secs"));
    }
    if config.supervisor.dependency_timeout_secs == 0 {
        errors.push(ValidationError::ZeroValue("supervisor.dependency_timeout_secs"));
    }
    if config.health.server_enabled && config.health.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress(config.health.bind_address.clone()));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress(config.observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_roles(config: &SupervisorConfig, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for role in &config.roles {
        if role.name.trim().is_empty() {
            errors.push(ValidationError::EmptyRoleName);
        } else if !seen.insert(role.name.as_str()) {
            errors.push(ValidationError::DuplicateRole(role.name.clone()));
        }
        if role.command.trim().is_empty() {
            errors.push(ValidationError::EmptyCommand(role.name.clone()));
        }
        if let Err(reason) = validate_probe(&role.probe) {
            errors.push(ValidationError::InvalidProbe {
                role: role.name.clone(),
                reason,
            });
        }
    }

    let edges: Vec<(&str, Vec<&str>)> = config
        .roles
        .iter()
        .map(|r| (r.name.as_str(), r.depends_on.iter().map(String::as_str).collect()))
        .collect();

    match topological_order(&edges) {
        Ok(_) => {}
        Err(OrderError::UnknownDependency { role, dependency }) => {
            errors.push(ValidationError::UnknownDependency { role, dependency });
        }
        Err(OrderError::Cycle(members)) => {
            errors.push(ValidationError::DependencyCycle(members.join(", ")));
        }
    }
}

fn validate_probe(probe: &ProbeConfig) -> Result<(), String> {
    match probe {
        ProbeConfig::None => Ok(()),
        ProbeConfig::Tcp { address } => {
            if is_host_port(address) {
                Ok(())
            } else {
                Err(format!("'{}' is not host:port", address))
            }
        }
        ProbeConfig::Http { url } => {
            let parsed = url::Url::parse(url).map_err(|e| format!("'{}': {}", url, e))?;
            match parsed.scheme() {
                "http" | "https" => Ok(()),
                other => Err(format!("unsupported scheme '{}'", other)),
            }
        }
        ProbeConfig::Exec { command } => {
            if command.first().map(|c| c.trim().is_empty()).unwrap_or(true) {
                Err("exec probe needs a command".to_string())
            } else {
                Ok(())
            }
        }
    }
}

fn validate_tunnel(config: &SupervisorConfig, errors: &mut Vec<ValidationError>) {
    let tunnel = &config.tunnel;

    if tunnel.interface.is_empty() || tunnel.interface.len() > 15 {
        errors.push(ValidationError::InvalidInterface(tunnel.interface.clone()));
    }
    if !is_host_port(&tunnel.endpoint) {
        errors.push(ValidationError::InvalidEndpoint(tunnel.endpoint.clone()));
    }
    if !is_cidr(&tunnel.address) {
        errors.push(ValidationError::InvalidCidr(tunnel.address.clone()));
    }
    for route in &tunnel.allowed_routes {
        if !is_cidr(route) {
            errors.push(ValidationError::InvalidCidr(route.clone()));
        }
    }
    if tunnel.driver == DriverKind::Wireguard && tunnel.peer_public_key.trim().is_empty() {
        errors.push(ValidationError::MissingPeerKey);
    }
    if let Some(probe) = &tunnel.probe_address {
        if !is_host_port(probe) {
            errors.push(ValidationError::InvalidEndpoint(probe.clone()));
        }
    }
}

/// `host:port` with a non-empty host and a numeric port.
pub(crate) fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// `a.b.c.d/len` or an IPv6 address with a prefix length.
pub(crate) fn is_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };
    match addr.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(_)) => prefix <= 32,
        Ok(std::net::IpAddr::V6(_)) => prefix <= 128,
        Err(_) => false,
    }
}
