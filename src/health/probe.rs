//! Readiness probes.
//!
//! # Responsibilities
//! - Decide whether one process (or the tunnel) is prepared to serve
//! - Bound every check in time
//!
//! # Design Decisions
//! - Probes are side-effect free and never retried internally
//! - A probe that overruns its deadline counts as not-ready, not as an error
//! - The orchestration layer never parses child protocols beyond connect/GET/exit status

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time;

use crate::config::ProbeConfig;

/// A bounded-latency readiness check.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `true` when the target is ready.
    async fn check(&self) -> bool;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Run a probe, treating a deadline overrun as not-ready.
pub async fn check_with_timeout(probe: &dyn ReadinessProbe, timeout: Duration) -> bool {
    match time::timeout(timeout, probe.check()).await {
        Ok(ready) => ready,
        Err(_) => {
            tracing::debug!(probe = %probe.describe(), timeout = ?timeout, "Probe timed out");
            false
        }
    }
}

/// Build the probe declared in config.
pub fn from_config(config: &ProbeConfig) -> Arc<dyn ReadinessProbe> {
    match config {
        ProbeConfig::None => Arc::new(AlwaysReady),
        ProbeConfig::Tcp { address } => Arc::new(TcpProbe::new(address.clone())),
        ProbeConfig::Http { url } => Arc::new(HttpProbe::new(url.clone())),
        ProbeConfig::Exec { command } => Arc::new(ExecProbe::new(command.clone())),
    }
}

/// Ready as soon as it is asked.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReady;

#[async_trait]
impl ReadinessProbe for AlwaysReady {
    async fn check(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}

/// Ready when a TCP connection to the address succeeds.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn check(&self) -> bool {
        TcpStream::connect(&self.address).await.is_ok()
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// Ready when a GET on the URL returns a success status.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self { url: url.into(), client }
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self
            .client
            .get(&self.url)
            .header("user-agent", "tunnel-supervisor-probe")
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!(url = %self.url, error = %e, "HTTP probe failed");
                false
            }
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Ready when the command exits with status 0.
#[derive(Debug, Clone)]
pub struct ExecProbe {
    command: Vec<String>,
}

impl ExecProbe {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ReadinessProbe for ExecProbe {
    async fn check(&self) -> bool {
        let Some((program, args)) = self.command.split_first() else {
            return false;
        };

        // kill_on_drop reaps the probe when the caller's deadline cancels us.
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn describe(&self) -> String {
        format!("exec:{}", self.command.join(" "))
    }
}

/// Ready while a shared flag is set.
#[derive(Debug, Clone, Default)]
pub struct FlagProbe {
    flag: Arc<AtomicBool>,
}

impl FlagProbe {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn set(&self, ready: bool) {
        self.flag.store(ready, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReadinessProbe for FlagProbe {
    async fn check(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        "flag".to_string()
    }
}
