//! Environment-scoped credential resolution.
//!
//! # Responsibilities
//! - Map an environment tag to its pair of variable names
//! - Look the values up in a key-value source
//! - Validate presence and WireGuard key format
//!
//! # Design Decisions
//! - The source is a trait so the process environment can be swapped for any store
//! - Values move into SecretString as soon as they leave the source
//! - Validation failures name the variable and a fixed reason, never the value

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use zeroize::Zeroizing;

use crate::config::SecretsConfig;
use crate::secrets::credential::{
    Credential, CredentialKind, CredentialSet, Environment, SecretError, SecretRef,
};

/// WireGuard keys are 32 raw bytes, base64 encoded.
const KEY_LEN: usize = 32;

/// Key-value lookup the resolver reads from.
pub trait SecretSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl SecretSource for EnvSource {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed in-memory map. Used for embedding and tests.
#[derive(Default, Clone)]
pub struct StaticSource {
    values: HashMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SecretSource for StaticSource {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Resolves the credential set for an environment.
pub struct SecretResolver<S> {
    source: S,
    names: SecretsConfig,
}

impl<S: SecretSource> SecretResolver<S> {
    pub fn new(source: S, names: SecretsConfig) -> Self {
        Self { source, names }
    }

    /// Name of the variable holding `kind` for `environment`.
    pub fn variable(&self, environment: Environment, kind: CredentialKind) -> &str {
        match (environment, kind) {
            (Environment::Dev, CredentialKind::PrivateKey) => &self.names.dev_private_key_var,
            (Environment::Dev, CredentialKind::PresharedKey) => &self.names.dev_preshared_key_var,
            (Environment::Prod, CredentialKind::PrivateKey) => &self.names.prod_private_key_var,
            (Environment::Prod, CredentialKind::PresharedKey) => &self.names.prod_preshared_key_var,
        }
    }

    /// Reference to a credential without resolving it.
    pub fn reference(&self, environment: Environment, kind: CredentialKind) -> SecretRef {
        SecretRef {
            environment,
            kind,
            variable: self.variable(environment, kind).to_string(),
        }
    }

    /// Resolve and validate both keys for `environment`.
    pub fn resolve(&self, environment: Environment) -> Result<CredentialSet, SecretError> {
        let result = self
            .resolve_one(environment, CredentialKind::PrivateKey)
            .and_then(|private_key| {
                let preshared_key = self.resolve_one(environment, CredentialKind::PresharedKey)?;
                Ok(CredentialSet {
                    private_key,
                    preshared_key,
                })
            });

        match &result {
            Ok(_) => tracing::info!(environment = %environment, success = true, "Credentials resolved"),
            Err(_) => tracing::warn!(environment = %environment, success = false, "Credentials resolved"),
        }

        result
    }

    fn resolve_one(&self, environment: Environment, kind: CredentialKind) -> Result<Credential, SecretError> {
        let variable = self.variable(environment, kind);
        let value = self
            .source
            .lookup(variable)
            .map(SecretString::from)
            .ok_or_else(|| SecretError::MissingCredential {
                environment,
                kind,
                variable: variable.to_string(),
            })?;

        if let Err(reason) = validate_key(&value) {
            return Err(SecretError::InvalidCredential {
                environment,
                kind,
                variable: variable.to_string(),
                reason,
            });
        }

        Ok(Credential::new(environment, kind, value))
    }
}

fn validate_key(value: &SecretString) -> Result<(), &'static str> {
    let encoded = value.expose_secret().trim();
    if encoded.is_empty() {
        return Err("value is empty");
    }

    let decoded = STANDARD
        .decode(encoded)
        .map(Zeroizing::new)
        .map_err(|_| "value is not valid base64")?;

    if decoded.len() != KEY_LEN {
        return Err("decoded key must be 32 bytes");
    }
    Ok(())
}
