//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tunnel_supervisor::config::{
    DriverKind, Environment, LogSinkConfig, ProbeConfig, RestartPolicy, RoleConfig, SupervisorConfig,
};
use tunnel_supervisor::lifecycle::LifecycleState;
use tunnel_supervisor::secrets::StaticSource;
use tunnel_supervisor::tunnel::{LinkDriver, PeerSpec, TunnelError};

/// 32 bytes of 'a', base64.
pub const KEY_A: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";
/// 32 bytes of 'b', base64.
pub const KEY_B: &str = "YmJiYmJiYmJiYmJiYmJiYmJiYmJiYmJiYmJiYmJiYmI=";

/// Both environments fully populated.
pub fn all_secrets() -> StaticSource {
    StaticSource::new()
        .with("WG_PRIVATE_KEY_DEV", KEY_A)
        .with("WG_PRESHARED_KEY_DEV", KEY_B)
        .with("WG_PRIVATE_KEY_PROD", KEY_B)
        .with("WG_PRESHARED_KEY_PROD", KEY_A)
}

/// Only the prod pair.
pub fn prod_secrets_only() -> StaticSource {
    StaticSource::new()
        .with("WG_PRIVATE_KEY_PROD", KEY_B)
        .with("WG_PRESHARED_KEY_PROD", KEY_A)
}

/// Fast timings, dry-run tunnel, no health endpoint.
pub fn test_config(environment: Environment) -> SupervisorConfig {
    let mut config = SupervisorConfig {
        environment,
        ..SupervisorConfig::default()
    };

    config.tunnel.driver = DriverKind::DryRun;
    config.tunnel.endpoint = "vpn.example.org:51820".to_string();
    config.tunnel.peer_public_key = "cGVlcg==".to_string();
    config.tunnel.allowed_routes = vec!["10.0.0.0/16".to_string()];
    config.tunnel.handshake_timeout_secs = 1;

    config.restart.backoff_base_ms = 10;
    config.restart.backoff_cap_ms = 50;

    config.supervisor.dependency_timeout_secs = 2;
    config.supervisor.grace_period_secs = 2;
    config.supervisor.readiness_poll_ms = 10;

    config.health.interval_ms = 20;
    config.health.probe_timeout_ms = 200;
    config.health.ready_timeout_secs = 5;
    config.health.server_enabled = false;
    config.health.bind_address = "127.0.0.1:0".to_string();

    config.lifecycle.tunnel_max_attempts = 2;
    config.lifecycle.tunnel_backoff_base_ms = 10;
    config.lifecycle.tunnel_backoff_cap_ms = 50;

    config
}

/// A role running `sh -c script`.
pub fn shell_role(name: &str, script: &str, depends_on: &[&str]) -> RoleConfig {
    RoleConfig {
        name: name.to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        working_dir: None,
        env: BTreeMap::new(),
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        restart: RestartPolicy::OnFailure,
        probe: ProbeConfig::None,
        log: LogSinkConfig::Null,
        optional: false,
        grace_period_secs: None,
    }
}

/// document-store ← app-server ← reverse-proxy, each a long sleep.
pub fn fleet() -> Vec<RoleConfig> {
    vec![
        shell_role("document-store", "exec sleep 30", &[]),
        shell_role("app-server", "exec sleep 30", &["document-store"]),
        shell_role("reverse-proxy", "exec sleep 30", &["app-server"]),
    ]
}

/// A loopback address nothing is listening on (yet).
pub async fn unused_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Accept and drop connections on `addr` until the task is aborted.
pub async fn start_listener(addr: SocketAddr) -> JoinHandle<()> {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    })
}

/// Wait for the lifecycle to reach `target`.
pub async fn wait_for_state(rx: &mut watch::Receiver<LifecycleState>, target: LifecycleState, timeout: Duration) {
    let reached = async { rx.wait_for(|state| *state == target).await.is_ok() };
    match tokio::time::timeout(timeout, reached).await {
        Ok(true) => {}
        _ => panic!("lifecycle did not reach {} within {:?}", target, timeout),
    }
}

/// In-memory link driver with failure knobs and call counters.
#[derive(Default)]
pub struct FakeDriver {
    never_handshake: bool,
    hang_handshake: bool,
    deny_permission: bool,
    links: Mutex<HashSet<String>>,
    peers: Mutex<HashSet<String>>,
    pub creates: AtomicU32,
    pub deletes: AtomicU32,
    pub keys_installed: AtomicU32,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The peer never answers.
    pub fn never_handshake() -> Arc<Self> {
        Arc::new(Self {
            never_handshake: true,
            ..Self::default()
        })
    }

    /// Querying the handshake never returns, like a wedged `wg show`.
    pub fn hanging_handshake() -> Arc<Self> {
        Arc::new(Self {
            hang_handshake: true,
            ..Self::default()
        })
    }

    /// Interface creation is refused.
    pub fn permission_denied() -> Arc<Self> {
        Arc::new(Self {
            deny_permission: true,
            ..Self::default()
        })
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn has_link(&self, interface: &str) -> bool {
        self.links.lock().unwrap().contains(interface)
    }
}

#[async_trait]
impl LinkDriver for FakeDriver {
    async fn link_exists(&self, interface: &str) -> Result<bool, TunnelError> {
        Ok(self.has_link(interface))
    }

    async fn create_link(&self, interface: &str) -> Result<(), TunnelError> {
        if self.deny_permission {
            return Err(TunnelError::Permission(format!("cannot create {}: operation not permitted", interface)));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.links.lock().unwrap().insert(interface.to_string());
        Ok(())
    }

    async fn delete_link(&self, interface: &str) -> Result<(), TunnelError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.links.lock().unwrap().remove(interface);
        self.peers.lock().unwrap().remove(interface);
        Ok(())
    }

    async fn set_private_key(&self, _interface: &str, key: &SecretString) -> Result<(), TunnelError> {
        assert!(!key.expose_secret().is_empty());
        self.keys_installed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_peer(&self, interface: &str, peer: &PeerSpec<'_>) -> Result<(), TunnelError> {
        assert!(!peer.preshared_key.expose_secret().is_empty());
        self.keys_installed.fetch_add(1, Ordering::SeqCst);
        self.peers.lock().unwrap().insert(interface.to_string());
        Ok(())
    }

    async fn add_address(&self, _interface: &str, _cidr: &str) -> Result<(), TunnelError> {
        Ok(())
    }

    async fn set_link_up(&self, _interface: &str) -> Result<(), TunnelError> {
        Ok(())
    }

    async fn add_route(&self, _interface: &str, _cidr: &str) -> Result<(), TunnelError> {
        Ok(())
    }

    async fn delete_route(&self, _interface: &str, _cidr: &str) -> Result<(), TunnelError> {
        Ok(())
    }

    async fn latest_handshake(&self, interface: &str, _peer: &str) -> Result<Option<SystemTime>, TunnelError> {
        if self.hang_handshake {
            std::future::pending::<()>().await;
        }
        if self.never_handshake {
            return Ok(None);
        }
        let has_peer = self.peers.lock().unwrap().contains(interface);
        Ok(has_peer.then(SystemTime::now))
    }
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Route this thread's tracing output (TRACE and up) into the capture.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let capture = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || capture.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
