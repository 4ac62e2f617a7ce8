//! Link drivers: the privileged operations behind the tunnel manager.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::DriverKind;
use crate::tunnel::error::TunnelError;

/// Peer settings for the remote end of the tunnel.
pub struct PeerSpec<'a> {
    pub public_key: &'a str,
    pub endpoint: &'a str,
    pub allowed_ips: &'a [String],
    pub persistent_keepalive: Duration,
    pub preshared_key: &'a SecretString,
}

/// Interface-level operations the tunnel manager needs.
#[async_trait]
pub trait LinkDriver: Send + Sync {
    async fn link_exists(&self, interface: &str) -> Result<bool, TunnelError>;

    async fn create_link(&self, interface: &str) -> Result<(), TunnelError>;

    /// Delete the link. Deleting a missing link succeeds.
    async fn delete_link(&self, interface: &str) -> Result<(), TunnelError>;

    async fn set_private_key(&self, interface: &str, key: &SecretString) -> Result<(), TunnelError>;

    async fn set_peer(&self, interface: &str, peer: &PeerSpec<'_>) -> Result<(), TunnelError>;

    async fn add_address(&self, interface: &str, cidr: &str) -> Result<(), TunnelError>;

    async fn set_link_up(&self, interface: &str) -> Result<(), TunnelError>;

    async fn add_route(&self, interface: &str, cidr: &str) -> Result<(), TunnelError>;

    async fn delete_route(&self, interface: &str, cidr: &str) -> Result<(), TunnelError>;

    /// Time of the last completed handshake with the peer, if any.
    async fn latest_handshake(&self, interface: &str, peer_public_key: &str)
        -> Result<Option<SystemTime>, TunnelError>;
}

/// Build the driver selected in config.
pub fn from_kind(kind: DriverKind) -> Arc<dyn LinkDriver> {
    match kind {
        DriverKind::Wireguard => Arc::new(WgCommandDriver::new()),
        DriverKind::DryRun => Arc::new(DryRunDriver::default()),
    }
}

// ---------------------------------------------------------------------------
// WgCommandDriver
// ---------------------------------------------------------------------------

/// Kernel WireGuard driven through `ip(8)` and `wg(8)`.
#[derive(Debug, Clone)]
pub struct WgCommandDriver {
    ip_bin: String,
    wg_bin: String,
}

impl Default for WgCommandDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl WgCommandDriver {
    pub fn new() -> Self {
        Self {
            ip_bin: "ip".to_string(),
            wg_bin: "wg".to_string(),
        }
    }

    /// Run a command, optionally writing a secret to its stdin.
    async fn run(&self, program: &str, args: &[&str], stdin: Option<&SecretString>) -> Result<String, TunnelError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => TunnelError::Permission(format!("cannot execute {}", program)),
            ErrorKind::NotFound => TunnelError::Config(format!("`{}` is not installed", program)),
            _ => TunnelError::Command {
                program: program.to_string(),
                detail: e.to_string(),
            },
        })?;

        if let (Some(secret), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(secret.expose_secret().as_bytes())
                .await
                .map_err(|e| TunnelError::Command {
                    program: program.to_string(),
                    detail: format!("writing stdin: {}", e),
                })?;
            // Dropping the pipe closes it so `wg` sees EOF.
        }

        let output = child.wait_with_output().await.map_err(|e| TunnelError::Command {
            program: program.to_string(),
            detail: e.to_string(),
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
            return Err(TunnelError::Permission(format!("{} {}", program, args.join(" "))));
        }
        Err(TunnelError::Command {
            program: program.to_string(),
            detail: stderr,
        })
    }
}

#[async_trait]
impl LinkDriver for WgCommandDriver {
    async fn link_exists(&self, interface: &str) -> Result<bool, TunnelError> {
        match self.run(&self.ip_bin, &["link", "show", "dev", interface], None).await {
            Ok(_) => Ok(true),
            Err(TunnelError::Command { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_link(&self, interface: &str) -> Result<(), TunnelError> {
        self.run(&self.ip_bin, &["link", "add", "dev", interface, "type", "wireguard"], None)
            .await
            .map(|_| ())
    }

    async fn delete_link(&self, interface: &str) -> Result<(), TunnelError> {
        match self.run(&self.ip_bin, &["link", "delete", "dev", interface], None).await {
            Ok(_) => Ok(()),
            Err(TunnelError::Command { detail, .. }) if detail.contains("Cannot find device") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn set_private_key(&self, interface: &str, key: &SecretString) -> Result<(), TunnelError> {
        self.run(&self.wg_bin, &["set", interface, "private-key", "/dev/stdin"], Some(key))
            .await
            .map(|_| ())
    }

    async fn set_peer(&self, interface: &str, peer: &PeerSpec<'_>) -> Result<(), TunnelError> {
        let allowed = peer.allowed_ips.join(",");
        let keepalive = peer.persistent_keepalive.as_secs().to_string();
        let mut args = vec![
            "set",
            interface,
            "peer",
            peer.public_key,
            "preshared-key",
            "/dev/stdin",
            "endpoint",
            peer.endpoint,
            "persistent-keepalive",
            keepalive.as_str(),
        ];
        if !allowed.is_empty() {
            args.push("allowed-ips");
            args.push(allowed.as_str());
        }
        self.run(&self.wg_bin, &args, Some(peer.preshared_key)).await.map(|_| ())
    }

    async fn add_address(&self, interface: &str, cidr: &str) -> Result<(), TunnelError> {
        self.run(&self.ip_bin, &["address", "replace", cidr, "dev", interface], None)
            .await
            .map(|_| ())
    }

    async fn set_link_up(&self, interface: &str) -> Result<(), TunnelError> {
        self.run(&self.ip_bin, &["link", "set", "up", "dev", interface], None)
            .await
            .map(|_| ())
    }

    async fn add_route(&self, interface: &str, cidr: &str) -> Result<(), TunnelError> {
        self.run(&self.ip_bin, &["route", "replace", cidr, "dev", interface], None)
            .await
            .map(|_| ())
    }

    async fn delete_route(&self, interface: &str, cidr: &str) -> Result<(), TunnelError> {
        self.run(&self.ip_bin, &["route", "delete", cidr, "dev", interface], None)
            .await
            .map(|_| ())
    }

    async fn latest_handshake(
        &self,
        interface: &str,
        peer_public_key: &str,
    ) -> Result<Option<SystemTime>, TunnelError> {
        let output = self.run(&self.wg_bin, &["show", interface, "latest-handshakes"], None).await?;
        Ok(parse_latest_handshake(&output, peer_public_key))
    }
}

/// Parse `wg show <if> latest-handshakes` output (`<pubkey>\t<epoch>` per line).
fn parse_latest_handshake(output: &str, peer_public_key: &str) -> Option<SystemTime> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .find(|(key, _)| key.trim() == peer_public_key)
        .and_then(|(_, epoch)| epoch.trim().parse::<u64>().ok())
        .filter(|epoch| *epoch > 0)
        .map(|epoch| UNIX_EPOCH + Duration::from_secs(epoch))
}

// ---------------------------------------------------------------------------
// DryRunDriver
// ---------------------------------------------------------------------------

/// Records link operations without touching the host.
///
/// Handshakes complete as soon as a peer is set. Intended for unprivileged
/// development runs where the remote cluster is not needed.
#[derive(Debug, Default)]
pub struct DryRunDriver {
    links: Mutex<HashSet<String>>,
    peers: Mutex<HashSet<String>>,
    operations: Mutex<Vec<String>>,
}

impl DryRunDriver {
    /// Operations performed so far, without key material.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    fn record(&self, op: String) {
        tracing::debug!(operation = %op, "dry-run link operation");
        if let Ok(mut ops) = self.operations.lock() {
            ops.push(op);
        }
    }
}

#[async_trait]
impl LinkDriver for DryRunDriver {
    async fn link_exists(&self, interface: &str) -> Result<bool, TunnelError> {
        Ok(self.links.lock().map(|l| l.contains(interface)).unwrap_or(false))
    }

    async fn create_link(&self, interface: &str) -> Result<(), TunnelError> {
        self.record(format!("create {}", interface));
        if let Ok(mut links) = self.links.lock() {
            links.insert(interface.to_string());
        }
        Ok(())
    }

    async fn delete_link(&self, interface: &str) -> Result<(), TunnelError> {
        self.record(format!("delete {}", interface));
        if let Ok(mut links) = self.links.lock() {
            links.remove(interface);
        }
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(interface);
        }
        Ok(())
    }

    async fn set_private_key(&self, interface: &str, _key: &SecretString) -> Result<(), TunnelError> {
        self.record(format!("private-key {}", interface));
        Ok(())
    }

    async fn set_peer(&self, interface: &str, peer: &PeerSpec<'_>) -> Result<(), TunnelError> {
        self.record(format!("peer {} {}", interface, peer.endpoint));
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(interface.to_string());
        }
        Ok(())
    }

    async fn add_address(&self, interface: &str, cidr: &str) -> Result<(), TunnelError> {
        self.record(format!("address {} {}", interface, cidr));
        Ok(())
    }

    async fn set_link_up(&self, interface: &str) -> Result<(), TunnelError> {
        self.record(format!("up {}", interface));
        Ok(())
    }

    async fn add_route(&self, interface: &str, cidr: &str) -> Result<(), TunnelError> {
        self.record(format!("route add {} {}", interface, cidr));
        Ok(())
    }

    async fn delete_route(&self, interface: &str, cidr: &str) -> Result<(), TunnelError> {
        self.record(format!("route delete {} {}", interface, cidr));
        Ok(())
    }

    async fn latest_handshake(&self, interface: &str, _peer: &str) -> Result<Option<SystemTime>, TunnelError> {
        let has_peer = self.peers.lock().map(|p| p.contains(interface)).unwrap_or(false);
        Ok(has_peer.then(SystemTime::now))
    }
}
