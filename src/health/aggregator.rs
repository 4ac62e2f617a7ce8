//! Health aggregation.
//!
//! # Responsibilities
//! - Periodically probe the tunnel and every ready role
//! - Publish a single composite status for consumers
//! - Let startup block until the composite signal turns ready
//!
//! # Design Decisions
//! - All probes of one cycle run concurrently, each under the probe timeout
//! - A role only counts as ready when the supervisor says so AND its probe passes
//! - The latest status is swapped in atomically; readers never block the poller

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time;

use crate::config::HealthConfig;
use crate::health::probe::{check_with_timeout, ReadinessProbe};
use crate::health::status::{HealthStatus, RoleHealth};
use crate::observability::metrics;
use crate::supervisor::ProcessSupervisor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("not ready after {0:?}")]
    Timeout(Duration),
}

/// Combines tunnel and role readiness into one status.
pub struct HealthAggregator {
    supervisor: ProcessSupervisor,
    tunnel: Mutex<Option<Arc<dyn ReadinessProbe>>>,
    status: ArcSwap<HealthStatus>,
    ready: watch::Sender<bool>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(supervisor: ProcessSupervisor, config: &HealthConfig) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            supervisor,
            tunnel: Mutex::new(None),
            status: ArcSwap::from_pointee(HealthStatus::initial()),
            ready,
            interval: Duration::from_millis(config.interval_ms.max(1)),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Install (or clear) the tunnel probe. Without one the tunnel is not ready.
    pub fn set_tunnel_probe(&self, probe: Option<Arc<dyn ReadinessProbe>>) {
        *self.tunnel.lock().unwrap_or_else(|p| p.into_inner()) = probe;
    }

    /// The status computed by the last cycle.
    pub fn current_status(&self) -> Arc<HealthStatus> {
        self.status.load_full()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Receiver that changes whenever overall-ready flips.
    pub fn ready_receiver(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Block until overall-ready, or fail after `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), HealthError> {
        let mut rx = self.ready.subscribe();
        let became_ready = async move { rx.wait_for(|ready| *ready).await.is_ok() };

        match time::timeout(timeout, became_ready).await {
            Ok(true) => Ok(()),
            _ => Err(HealthError::Timeout(timeout)),
        }
    }

    /// Run one aggregation cycle and publish the result.
    pub async fn poll_once(&self) -> Arc<HealthStatus> {
        let checks: Vec<_> = self
            .supervisor
            .snapshots()
            .into_iter()
            .filter_map(|handle| self.supervisor.role(&handle.role).map(|role| (handle, role)))
            .collect();
        let tunnel = self.tunnel.lock().unwrap_or_else(|p| p.into_inner()).clone();
        let timeout = self.probe_timeout;

        let tunnel_check = async {
            match &tunnel {
                Some(probe) => check_with_timeout(probe.as_ref(), timeout).await,
                None => false,
            }
        };
        let role_checks = join_all(checks.iter().map(|(handle, role)| async move {
            handle.is_ready() && check_with_timeout(role.probe.as_ref(), timeout).await
        }));
        let (tunnel_ready, role_ready) = tokio::join!(tunnel_check, role_checks);

        let role_health = checks
            .into_iter()
            .zip(role_ready)
            .map(|((handle, role), ready)| RoleHealth {
                name: handle.role,
                state: handle.state,
                ready,
                optional: role.optional,
                pid: handle.pid,
                restart_count: handle.restart_count,
            })
            .collect();

        let status = Arc::new(HealthStatus::compose(tunnel_ready, role_health));
        self.status.store(status.clone());

        let was_ready = self.ready.send_replace(status.ready);
        if was_ready != status.ready {
            metrics::record_ready(status.ready);
            if status.ready {
                tracing::info!("System ready");
            } else {
                tracing::warn!(
                    tunnel_ready = status.tunnel_ready,
                    unready = ?status.unready_roles(),
                    "System no longer ready"
                );
            }
        }

        status
    }

    /// Poll until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Health aggregator starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health aggregator received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
