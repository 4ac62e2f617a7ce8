//! Credential types and error definitions.

use secrecy::SecretString;
use std::fmt;
use thiserror::Error;

// Re-export Environment from config module to avoid duplication
pub use crate::config::schema::Environment;

/// Which piece of tunnel key material a credential holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    PrivateKey,
    PresharedKey,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::PrivateKey => f.write_str("private key"),
            CredentialKind::PresharedKey => f.write_str("pre-shared key"),
        }
    }
}

/// Errors that can occur while resolving or consuming credentials.
///
/// None of the variants carry a secret value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    /// Required variable is absent from the source.
    #[error("missing {kind} for {environment} (variable {variable} is not set)")]
    MissingCredential {
        environment: Environment,
        kind: CredentialKind,
        variable: String,
    },

    /// Variable is present but the value is malformed.
    #[error("invalid {kind} for {environment} in {variable}: {reason}")]
    InvalidCredential {
        environment: Environment,
        kind: CredentialKind,
        variable: String,
        reason: &'static str,
    },

    /// The credential was already handed to its consumer.
    #[error("{0} has already been consumed")]
    AlreadyConsumed(CredentialKind),
}

/// Indirection to a credential: where it comes from, never what it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    pub environment: Environment,
    pub kind: CredentialKind,
    pub variable: String,
}

/// A resolved secret value with its environment tag and a consumed marker.
pub struct Credential {
    environment: Environment,
    kind: CredentialKind,
    value: Option<SecretString>,
}

impl Credential {
    pub(crate) fn new(environment: Environment, kind: CredentialKind, value: SecretString) -> Self {
        Self {
            environment,
            kind,
            value: Some(value),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn is_consumed(&self) -> bool {
        self.value.is_none()
    }

    /// Hand the value to its single consumer. A second call fails.
    pub(crate) fn consume(&mut self) -> Result<SecretString, SecretError> {
        self.value.take().ok_or(SecretError::AlreadyConsumed(self.kind))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("environment", &self.environment)
            .field("kind", &self.kind)
            .field("consumed", &self.is_consumed())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// The key pair one environment needs to bring the tunnel up.
#[derive(Debug)]
pub struct CredentialSet {
    pub private_key: Credential,
    pub preshared_key: Credential,
}

impl CredentialSet {
    pub fn environment(&self) -> Environment {
        self.private_key.environment()
    }

    pub fn is_consumed(&self) -> bool {
        self.private_key.is_consumed() && self.preshared_key.is_consumed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_credential_consumed_once() {
        let mut credential = Credential::new(
            Environment::Dev,
            CredentialKind::PrivateKey,
            SecretString::from("super-secret".to_string()),
        );

        assert!(!credential.is_consumed());
        let value = credential.consume().unwrap();
        assert_eq!(value.expose_secret(), "super-secret");
        assert!(credential.is_consumed());
        assert_eq!(
            credential.consume().unwrap_err(),
            SecretError::AlreadyConsumed(CredentialKind::PrivateKey)
        );
    }

    #[test]
    fn test_debug_is_redacted() {
        let credential = Credential::new(
            Environment::Prod,
            CredentialKind::PresharedKey,
            SecretString::from("super-secret".to_string()),
        );
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_error_display_names_variable_only() {
        let err = SecretError::MissingCredential {
            environment: Environment::Dev,
            kind: CredentialKind::PrivateKey,
            variable: "WG_PRIVATE_KEY_DEV".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing private key for dev (variable WG_PRIVATE_KEY_DEV is not set)"
        );
    }
}
