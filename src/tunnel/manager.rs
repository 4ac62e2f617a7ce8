//! Tunnel bring-up, reachability verification and teardown.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::health::probe::ReadinessProbe;
use crate::observability::metrics;
use crate::secrets::CredentialSet;
use crate::tunnel::config::TunnelConfig;
use crate::tunnel::driver::{LinkDriver, PeerSpec};
use crate::tunnel::error::TunnelError;

/// How often the handshake and in-tunnel probe are retried inside the deadline.
const PROBE_POLL: Duration = Duration::from_millis(200);

/// A configured, verified tunnel.
#[derive(Debug)]
pub struct TunnelHandle {
    interface: String,
    endpoint: String,
    routes: Vec<String>,
    established_at: SystemTime,
    up: Arc<AtomicBool>,
}

impl TunnelHandle {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn established_at(&self) -> SystemTime {
        self.established_at
    }

    /// `false` once torn down.
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// Brings the tunnel up and down through a link driver.
#[derive(Clone)]
pub struct TunnelManager {
    driver: Arc<dyn LinkDriver>,
}

impl TunnelManager {
    pub fn new(driver: Arc<dyn LinkDriver>) -> Self {
        Self { driver }
    }

    /// Configure the interface and verify the remote end is reachable.
    ///
    /// Consumes the credentials; their values are dropped as soon as the
    /// interface holds them. On failure nothing created here is left behind.
    pub async fn bring_up(
        &self,
        config: &TunnelConfig,
        mut credentials: CredentialSet,
    ) -> Result<TunnelHandle, TunnelError> {
        if credentials.environment() != config.private_key.environment {
            return Err(TunnelError::Config(format!(
                "credentials for {} supplied to a {} tunnel",
                credentials.environment(),
                config.private_key.environment
            )));
        }
        if config.interface.is_empty() || config.interface.len() > 15 {
            return Err(TunnelError::Config(format!(
                "interface name '{}' must be 1-15 characters",
                config.interface
            )));
        }

        if self.driver.link_exists(&config.interface).await? {
            tracing::warn!(interface = %config.interface, "Stale tunnel interface found, removing before re-create");
            self.driver.delete_link(&config.interface).await?;
        }

        tracing::info!(
            interface = %config.interface,
            endpoint = %config.endpoint,
            environment = %config.private_key.environment,
            "Bringing tunnel up"
        );
        self.driver.create_link(&config.interface).await?;

        let result = async {
            self.configure(config, &mut credentials).await?;
            drop(credentials);
            tracing::debug!(interface = %config.interface, "Key material discarded");

            self.verify_reachable(config).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(interface = %config.interface, error = %e, "Tunnel bring-up failed, removing interface");
            if let Err(cleanup) = self.driver.delete_link(&config.interface).await {
                tracing::error!(interface = %config.interface, error = %cleanup, "Failed to remove interface after bring-up failure");
            }
            return Err(e);
        }

        metrics::record_tunnel_up(true);
        tracing::info!(interface = %config.interface, endpoint = %config.endpoint, "Tunnel established");

        Ok(TunnelHandle {
            interface: config.interface.clone(),
            endpoint: config.endpoint.clone(),
            routes: config.allowed_routes.clone(),
            established_at: SystemTime::now(),
            up: Arc::new(AtomicBool::new(true)),
        })
    }

    async fn configure(&self, config: &TunnelConfig, credentials: &mut CredentialSet) -> Result<(), TunnelError> {
        let private_key = credentials.private_key.consume()?;
        self.driver.set_private_key(&config.interface, &private_key).await?;
        drop(private_key);

        let preshared_key = credentials.preshared_key.consume()?;
        let peer = PeerSpec {
            public_key: &config.peer_public_key,
            endpoint: &config.endpoint,
            allowed_ips: &config.allowed_routes,
            persistent_keepalive: config.persistent_keepalive,
            preshared_key: &preshared_key,
        };
        self.driver.set_peer(&config.interface, &peer).await?;
        drop(preshared_key);

        self.driver.add_address(&config.interface, &config.address).await?;
        self.driver.set_link_up(&config.interface).await?;
        for route in &config.allowed_routes {
            self.driver.add_route(&config.interface, route).await?;
        }
        Ok(())
    }

    /// Wait for a handshake, then for the optional in-tunnel TCP target.
    async fn verify_reachable(&self, config: &TunnelConfig) -> Result<(), TunnelError> {
        let deadline = Instant::now() + config.handshake_timeout;
        let timed_out = || TunnelError::HandshakeTimeout {
            endpoint: config.endpoint.clone(),
            timeout_secs: config.handshake_timeout.as_secs(),
        };

        loop {
            let query = self.driver.latest_handshake(&config.interface, &config.peer_public_key);
            let handshake = match time::timeout_at(deadline, query).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(interface = %config.interface, "Handshake query did not return before the deadline");
                    return Err(timed_out());
                }
            };
            if handshake.is_some() {
                tracing::debug!(interface = %config.interface, "Handshake observed");
                break;
            }
            if Instant::now() + PROBE_POLL > deadline {
                return Err(timed_out());
            }
            time::sleep(PROBE_POLL).await;
        }

        let Some(address) = &config.probe_address else {
            return Ok(());
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }
            match time::timeout(remaining, TcpStream::connect(address)).await {
                Ok(Ok(_)) => {
                    tracing::debug!(address = %address, "Remote reachable through tunnel");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::trace!(address = %address, error = %e, "Tunnel probe connect failed");
                    time::sleep(PROBE_POLL.min(remaining)).await;
                }
                Err(_) => return Err(timed_out()),
            }
        }
    }

    /// Remove routes and the interface. Safe to call repeatedly.
    pub async fn tear_down(&self, handle: &TunnelHandle) -> Result<(), TunnelError> {
        if !handle.up.swap(false, Ordering::SeqCst) {
            tracing::debug!(interface = %handle.interface, "Tunnel already torn down");
            return Ok(());
        }

        for route in &handle.routes {
            if let Err(e) = self.driver.delete_route(&handle.interface, route).await {
                tracing::debug!(interface = %handle.interface, route = %route, error = %e, "Route removal failed");
            }
        }

        self.driver.delete_link(&handle.interface).await?;
        metrics::record_tunnel_up(false);
        tracing::info!(interface = %handle.interface, "Tunnel torn down");
        Ok(())
    }

    /// Probe reporting whether the tunnel is still up.
    pub fn status_probe(&self, handle: &TunnelHandle) -> TunnelProbe {
        TunnelProbe {
            driver: self.driver.clone(),
            interface: handle.interface.clone(),
            up: handle.up.clone(),
        }
    }
}

/// Tunnel readiness for the health aggregator.
pub struct TunnelProbe {
    driver: Arc<dyn LinkDriver>,
    interface: String,
    up: Arc<AtomicBool>,
}

#[async_trait]
impl ReadinessProbe for TunnelProbe {
    async fn check(&self) -> bool {
        if !self.up.load(Ordering::SeqCst) {
            return false;
        }
        self.driver.link_exists(&self.interface).await.unwrap_or(false)
    }

    fn describe(&self) -> String {
        format!("tunnel:{}", self.interface)
    }
}
