//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{Environment, SupervisorConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Variable selecting the credential set at runtime.
pub const ENVIRONMENT_VAR: &str = "ENVIRONMENT";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {var}: {reason}")]
    Environment { var: &'static str, reason: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// `ENVIRONMENT` from the process environment overrides the file's value.
pub fn load_config(path: &Path) -> Result<SupervisorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: SupervisorConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply environment-derived overrides using the given lookup.
pub fn apply_env_overrides<F>(config: &mut SupervisorConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENVIRONMENT_VAR) {
        if !value.trim().is_empty() {
            config.environment = value
                .parse::<Environment>()
                .map_err(|reason| ConfigError::Environment { var: ENVIRONMENT_VAR, reason })?;
        }
    }
    Ok(())
}
