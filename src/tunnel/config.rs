//! Tunnel configuration.

use std::time::Duration;

use crate::config::TunnelSection;
use crate::secrets::SecretRef;

/// Everything needed to bring the tunnel up except the key values themselves.
///
/// Created once per environment at startup and never mutated.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub interface: String,
    /// Local tunnel address, CIDR.
    pub address: String,
    /// Remote `host:port`.
    pub endpoint: String,
    pub peer_public_key: String,
    pub allowed_routes: Vec<String>,
    pub persistent_keepalive: Duration,
    pub handshake_timeout: Duration,
    /// Reached with a TCP connect once the handshake is seen.
    pub probe_address: Option<String>,
    pub private_key: SecretRef,
    pub preshared_key: SecretRef,
}

impl TunnelConfig {
    pub fn from_section(section: &TunnelSection, private_key: SecretRef, preshared_key: SecretRef) -> Self {
        Self {
            interface: section.interface.clone(),
            address: section.address.clone(),
            endpoint: section.endpoint.clone(),
            peer_public_key: section.peer_public_key.clone(),
            allowed_routes: section.allowed_routes.clone(),
            persistent_keepalive: Duration::from_secs(section.persistent_keepalive_secs),
            handshake_timeout: Duration::from_secs(section.handshake_timeout_secs),
            probe_address: section.probe_address.clone(),
            private_key,
            preshared_key,
        }
    }
}
