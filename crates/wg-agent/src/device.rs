//! Network Control Port
//!
//! Narrow capability over the live WireGuard device: read the current peer
//! table, or apply a single peer-configuration delta. The kernel/netlink
//! adapter is supplied by the embedding process; this crate ships the
//! trait, the data model, and an in-memory double for tests.

use crate::keys::{KeyPair, PublicKey};
use ipnet::IpNet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Default persistent keepalive for installed peers
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// Snapshot of the live device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// The server's public key
    pub public_key: PublicKey,
    /// UDP listen port
    pub listen_port: u16,
    /// Current peer table
    pub peers: Vec<DevicePeer>,
}

/// One entry of the device peer table
#[derive(Debug, Clone)]
pub struct DevicePeer {
    pub public_key: PublicKey,
    pub allowed_ips: Vec<IpNet>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake_unix: i64,
}

impl DevicePeer {
    /// Live transfer statistics for read-model augmentation
    pub fn stats(&self) -> PeerStats {
        PeerStats {
            rx_bytes: self.rx_bytes,
            tx_bytes: self.tx_bytes,
            last_handshake_unix: self.last_handshake_unix,
        }
    }
}

/// Transfer counters and handshake time copied from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake_unix: i64,
}

/// A single peer-configuration change
#[derive(Debug, Clone)]
pub enum PeerDelta {
    /// Install or update a peer, replacing its allowed-IP set
    Upsert {
        public_key: PublicKey,
        allowed_ip: IpNet,
        keepalive: Duration,
    },
    /// Remove a peer from the device table
    Remove { public_key: PublicKey },
}

/// Capability for reading and mutating the live device peer table.
///
/// One call is a single bounded round trip; retries belong to the caller.
pub trait WgControl: Send + Sync {
    /// Read the device's current configuration and peer table
    fn device(
        &self,
        interface: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<DeviceInfo>> + Send;

    /// Apply one peer delta to the device
    fn apply(
        &self,
        interface: &str,
        delta: PeerDelta,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// In-memory control-port double.
///
/// Mirrors the apply semantics of a real device (upsert replaces allowed
/// IPs, remove is idempotent) and can be switched to fail either call for
/// rollback tests.
pub struct MockWgControl {
    devices: RwLock<HashMap<String, DeviceInfo>>,
    fail_device: AtomicBool,
    fail_apply: AtomicBool,
    apply_calls: AtomicU64,
}

impl MockWgControl {
    /// Empty mock; devices appear on first `apply`
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            fail_device: AtomicBool::new(false),
            fail_apply: AtomicBool::new(false),
            apply_calls: AtomicU64::new(0),
        }
    }

    /// Mock with one pre-created device
    pub async fn with_device(interface: &str, listen_port: u16) -> Self {
        let mock = Self::new();
        mock.add_device(interface, listen_port).await;
        mock
    }

    /// Pre-create a device with a fresh server key and no peers
    pub async fn add_device(&self, interface: &str, listen_port: u16) {
        self.devices.write().await.insert(
            interface.to_string(),
            DeviceInfo {
                public_key: KeyPair::generate().public,
                listen_port,
                peers: Vec::new(),
            },
        );
    }

    /// Make subsequent `device` calls fail
    pub fn set_fail_device(&self, fail: bool) {
        self.fail_device.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `apply` calls fail
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Number of `apply` calls that reached the device
    pub fn apply_count(&self) -> u64 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Whether a peer with this key is present on the device
    pub async fn has_peer(&self, interface: &str, public_key: &PublicKey) -> bool {
        self.devices
            .read()
            .await
            .get(interface)
            .map(|device| device.peers.iter().any(|p| p.public_key == *public_key))
            .unwrap_or(false)
    }

    /// Peer-table size of a device (0 if the device does not exist)
    pub async fn peer_count(&self, interface: &str) -> usize {
        self.devices
            .read()
            .await
            .get(interface)
            .map(|device| device.peers.len())
            .unwrap_or(0)
    }

    /// Inject transfer counters for an installed peer
    pub async fn set_peer_traffic(
        &self,
        interface: &str,
        public_key: &PublicKey,
        rx_bytes: u64,
        tx_bytes: u64,
        last_handshake_unix: i64,
    ) {
        if let Some(device) = self.devices.write().await.get_mut(interface) {
            for peer in &mut device.peers {
                if peer.public_key == *public_key {
                    peer.rx_bytes = rx_bytes;
                    peer.tx_bytes = tx_bytes;
                    peer.last_handshake_unix = last_handshake_unix;
                }
            }
        }
    }
}

impl Default for MockWgControl {
    fn default() -> Self {
        Self::new()
    }
}

impl WgControl for MockWgControl {
    async fn device(&self, interface: &str) -> anyhow::Result<DeviceInfo> {
        if self.fail_device.load(Ordering::SeqCst) {
            anyhow::bail!("injected device read failure");
        }

        self.devices
            .read()
            .await
            .get(interface)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("device {interface} not found"))
    }

    async fn apply(&self, interface: &str, delta: PeerDelta) -> anyhow::Result<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            anyhow::bail!("injected apply failure");
        }
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        let mut devices = self.devices.write().await;
        let device = devices.entry(interface.to_string()).or_insert_with(|| DeviceInfo {
            public_key: KeyPair::generate().public,
            listen_port: 51820,
            peers: Vec::new(),
        });

        match delta {
            PeerDelta::Upsert {
                public_key,
                allowed_ip,
                keepalive: _,
            } => {
                match device.peers.iter_mut().find(|p| p.public_key == public_key) {
                    Some(peer) => peer.allowed_ips = vec![allowed_ip],
                    None => device.peers.push(DevicePeer {
                        public_key,
                        allowed_ips: vec![allowed_ip],
                        rx_bytes: 0,
                        tx_bytes: 0,
                        last_handshake_unix: 0,
                    }),
                }
            }
            PeerDelta::Remove { public_key } => {
                device.peers.retain(|p| p.public_key != public_key);
            }
        }
        Ok(())
    }
}
