//! Tunnel error definitions.

use thiserror::Error;

use crate::secrets::SecretError;

/// Errors that can occur while bringing the tunnel up or down.
///
/// Messages never include key material; command stderr is only captured from
/// invocations whose secrets were passed on stdin.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Bad parameters: malformed config or mismatched credentials.
    #[error("Tunnel configuration error: {0}")]
    Config(String),

    /// Remote endpoint did not complete a handshake within the deadline.
    #[error("Handshake with {endpoint} timed out after {timeout_secs} seconds")]
    HandshakeTimeout { endpoint: String, timeout_secs: u64 },

    /// Interface creation needs elevated network capability.
    #[error("Permission denied: {0}. Creating the tunnel requires CAP_NET_ADMIN")]
    Permission(String),

    /// A link command failed for another reason.
    #[error("`{program}` failed: {detail}")]
    Command { program: String, detail: String },

    /// Credentials could not be consumed.
    #[error(transparent)]
    Credential(#[from] SecretError),
}

impl TunnelError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, TunnelError::HandshakeTimeout { .. })
    }

    /// Caused by configuration rather than the network or the host.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TunnelError::Config(_) | TunnelError::Credential(_))
    }
}
