//! Bare Peer Mode
//!
//! A simpler management surface that operates directly on caller-supplied
//! public keys: no user identifier, no key generation, no rendered config.
//! The caller brings the key and the allowed IP; the agent validates both,
//! drives the device, and tracks enablement in a public-key-keyed store
//! with the same copy-on-read discipline as the client registry.

use crate::device::{DEFAULT_KEEPALIVE, PeerDelta, PeerStats, WgControl};
use crate::error::AgentError;
use crate::keys::PublicKey;
use ipnet::IpNet;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// One externally-keyed peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Caller-supplied public key; the store key
    pub public_key: PublicKey,
    /// Opaque tag the caller attached to this peer
    pub peer_id: String,
    /// Caller-supplied allowed IP (validated CIDR)
    pub allowed_ip: IpNet,
    /// Whether the peer is expected on the live device
    pub enabled: bool,
}

/// Concurrent public-key-keyed store of peers
pub struct PeerStore {
    peers: RwLock<HashMap<PublicKey, PeerInfo>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add(&self, peer: PeerInfo) {
        self.peers.write().await.insert(peer.public_key.clone(), peer);
    }

    /// Look up a peer (defensive copy)
    pub async fn get(&self, public_key: &PublicKey) -> Option<PeerInfo> {
        self.peers.read().await.get(public_key).cloned()
    }

    pub async fn set_enabled(&self, public_key: &PublicKey, enabled: bool) -> bool {
        match self.peers.write().await.get_mut(public_key) {
            Some(peer) => {
                peer.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, public_key: &PublicKey) -> bool {
        self.peers.write().await.remove(public_key).is_some()
    }

    /// Snapshot of all peers, order unspecified
    pub async fn list(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }
}

impl Default for PeerStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Server details returned to the caller after installing a peer, for
/// manual client-side configuration
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server_public_key: PublicKey,
    pub listen_port: u16,
    /// Configured public endpoint, when the agent knows one
    pub server_endpoint: Option<String>,
}

/// Lifecycle manager for bare public-key peers.
///
/// Follows the same ordering rule as the client manager: the device is
/// updated before the store reflects the new intended state.
pub struct PeerManager<C> {
    interface: String,
    server_endpoint: Option<String>,
    store: PeerStore,
    control: C,
    op: Mutex<()>,
}

impl<C: WgControl> PeerManager<C> {
    pub fn new(interface: impl Into<String>, server_endpoint: Option<String>, control: C) -> Self {
        Self {
            interface: interface.into(),
            server_endpoint,
            store: PeerStore::new(),
            control,
            op: Mutex::new(()),
        }
    }

    /// Install a caller-keyed peer on the device and track it.
    ///
    /// Validates the public key and the allowed IP before touching any
    /// state. Returns the server-side details a client needs to connect.
    pub async fn add_peer(
        &self,
        public_key: &str,
        peer_id: &str,
        allowed_ip: &str,
        keepalive: Option<Duration>,
    ) -> Result<ServerInfo, AgentError> {
        let key: PublicKey = public_key.parse().map_err(|_| {
            AgentError::InvalidArgument(
                "invalid public_key: must be base64-encoded 32 bytes".to_string(),
            )
        })?;
        let allowed: IpNet = allowed_ip.parse().map_err(|_| {
            AgentError::InvalidArgument(
                "invalid allowed_ip: must be in CIDR format (e.g., 10.8.0.10/32)".to_string(),
            )
        })?;

        let _guard = self.op.lock().await;

        // Server info does not depend on the upsert; read it first so a
        // failed read leaves the device untouched.
        let device = self
            .control
            .device(&self.interface)
            .await
            .map_err(AgentError::ControlPort)?;

        self.control
            .apply(
                &self.interface,
                PeerDelta::Upsert {
                    public_key: key.clone(),
                    allowed_ip: allowed,
                    keepalive: keepalive.unwrap_or(DEFAULT_KEEPALIVE),
                },
            )
            .await
            .map_err(AgentError::ControlPort)?;

        self.store
            .add(PeerInfo {
                public_key: key.clone(),
                peer_id: peer_id.to_string(),
                allowed_ip: allowed,
                enabled: true,
            })
            .await;

        info!("Peer added: {} ({})", key, peer_id);
        Ok(ServerInfo {
            server_public_key: device.public_key,
            listen_port: device.listen_port,
            server_endpoint: self.server_endpoint.clone(),
        })
    }

    /// Remove a peer from the device and forget it. Removing an unknown
    /// key succeeds; device removal is idempotent.
    pub async fn remove_peer(&self, public_key: &str) -> Result<(), AgentError> {
        let key: PublicKey = public_key
            .parse()
            .map_err(|_| AgentError::InvalidArgument("invalid public_key".to_string()))?;

        let _guard = self.op.lock().await;

        self.control
            .apply(&self.interface, PeerDelta::Remove { public_key: key.clone() })
            .await
            .map_err(AgentError::ControlPort)?;

        self.store.remove(&key).await;
        info!("Peer removed: {}", key);
        Ok(())
    }

    /// Temporarily remove a peer from the device while keeping its entry.
    /// The enabled flag only flips after the device removal succeeded.
    pub async fn disable_peer(&self, public_key: &str) -> Result<(), AgentError> {
        let key: PublicKey = public_key
            .parse()
            .map_err(|_| AgentError::InvalidArgument("invalid public_key".to_string()))?;

        let _guard = self.op.lock().await;

        let peer = self
            .store
            .get(&key)
            .await
            .ok_or_else(|| AgentError::NotFound(format!("peer {key}")))?;
        if !peer.enabled {
            return Ok(());
        }

        self.control
            .apply(&self.interface, PeerDelta::Remove { public_key: key.clone() })
            .await
            .map_err(AgentError::ControlPort)?;

        self.store.set_enabled(&key, false).await;
        info!("Peer disabled: {}", key);
        Ok(())
    }

    /// Re-install a previously disabled peer with its stored allowed IP
    pub async fn enable_peer(&self, public_key: &str) -> Result<(), AgentError> {
        let key: PublicKey = public_key
            .parse()
            .map_err(|_| AgentError::InvalidArgument("invalid public_key".to_string()))?;

        let _guard = self.op.lock().await;

        let peer = self
            .store
            .get(&key)
            .await
            .ok_or_else(|| AgentError::NotFound(format!("peer {key}")))?;
        if peer.enabled {
            return Ok(());
        }

        self.control
            .apply(
                &self.interface,
                PeerDelta::Upsert {
                    public_key: key.clone(),
                    allowed_ip: peer.allowed_ip,
                    keepalive: DEFAULT_KEEPALIVE,
                },
            )
            .await
            .map_err(AgentError::ControlPort)?;

        self.store.set_enabled(&key, true).await;
        info!("Peer enabled: {}", key);
        Ok(())
    }

    /// Look up one peer, with live stats while it is enabled
    pub async fn get_peer(&self, public_key: &str) -> Result<(PeerInfo, Option<PeerStats>), AgentError> {
        let key: PublicKey = public_key
            .parse()
            .map_err(|_| AgentError::InvalidArgument("invalid public_key".to_string()))?;

        let peer = self
            .store
            .get(&key)
            .await
            .ok_or_else(|| AgentError::NotFound(format!("peer {key}")))?;

        let stats = if peer.enabled {
            match self.control.device(&self.interface).await {
                Ok(device) => device
                    .peers
                    .iter()
                    .find(|p| p.public_key == key)
                    .map(|p| p.stats()),
                Err(e) => {
                    warn!("Device read for peer stats failed: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok((peer, stats))
    }

    /// Snapshot of all tracked peers
    pub async fn list_peers(&self) -> Vec<PeerInfo> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockWgControl;
    use crate::keys::KeyPair;

    const VALID_KEY: &str = "jNQKmw+IF/llmxOlGwrMxaHiPiG5xQyBq3/OmfEpuQM=";

    async fn peer_manager() -> PeerManager<MockWgControl> {
        let control = MockWgControl::with_device("wg0", 51820).await;
        PeerManager::new("wg0", Some("vpn.example.com:51820".to_string()), control)
    }

    #[tokio::test]
    async fn test_add_peer() {
        let mgr = peer_manager().await;

        let info = mgr.add_peer(VALID_KEY, "peer-1", "10.8.0.10/32", None).await.unwrap();
        assert_eq!(info.listen_port, 51820);
        assert_eq!(info.server_endpoint.as_deref(), Some("vpn.example.com:51820"));

        let key: PublicKey = VALID_KEY.parse().unwrap();
        assert!(mgr.control.has_peer("wg0", &key).await);
        let (peer, _) = mgr.get_peer(VALID_KEY).await.unwrap();
        assert_eq!(peer.peer_id, "peer-1");
        assert!(peer.enabled);
    }

    #[tokio::test]
    async fn test_add_peer_validates_input() {
        let mgr = peer_manager().await;

        let err = mgr.add_peer("not-a-key", "p", "10.8.0.10/32", None).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));

        let err = mgr.add_peer(VALID_KEY, "p", "10.8.0.10", None).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));

        // Validation happens before any device call
        assert_eq!(mgr.control.apply_count(), 0);
        assert!(mgr.list_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_peer_device_read_failure_leaves_no_state() {
        let mgr = peer_manager().await;
        mgr.control.set_fail_device(true);

        let err = mgr.add_peer(VALID_KEY, "p", "10.8.0.10/32", None).await.unwrap_err();
        assert!(matches!(err, AgentError::ControlPort(_)));

        // The server-info read comes first, so nothing reached the device
        // and nothing was tracked
        let key: PublicKey = VALID_KEY.parse().unwrap();
        assert_eq!(mgr.control.apply_count(), 0);
        assert!(!mgr.control.has_peer("wg0", &key).await);
        assert!(mgr.list_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_peer_apply_failure_leaves_no_state() {
        let mgr = peer_manager().await;
        mgr.control.set_fail_apply(true);

        let err = mgr.add_peer(VALID_KEY, "p", "10.8.0.10/32", None).await.unwrap_err();
        assert!(matches!(err, AgentError::ControlPort(_)));

        let key: PublicKey = VALID_KEY.parse().unwrap();
        assert!(!mgr.control.has_peer("wg0", &key).await);
        assert!(mgr.list_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_peer() {
        let mgr = peer_manager().await;
        mgr.add_peer(VALID_KEY, "p", "10.8.0.10/32", None).await.unwrap();

        mgr.remove_peer(VALID_KEY).await.unwrap();
        let key: PublicKey = VALID_KEY.parse().unwrap();
        assert!(!mgr.control.has_peer("wg0", &key).await);
        assert!(mgr.list_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_disable_enable_cycle() {
        let mgr = peer_manager().await;
        mgr.add_peer(VALID_KEY, "p", "10.8.0.10/32", None).await.unwrap();
        let key: PublicKey = VALID_KEY.parse().unwrap();

        mgr.disable_peer(VALID_KEY).await.unwrap();
        assert!(!mgr.control.has_peer("wg0", &key).await);
        let (peer, stats) = mgr.get_peer(VALID_KEY).await.unwrap();
        assert!(!peer.enabled);
        assert!(stats.is_none());

        mgr.enable_peer(VALID_KEY).await.unwrap();
        assert!(mgr.control.has_peer("wg0", &key).await);
        assert!(mgr.get_peer(VALID_KEY).await.unwrap().0.enabled);
    }

    #[tokio::test]
    async fn test_disable_failure_keeps_enabled() {
        let mgr = peer_manager().await;
        mgr.add_peer(VALID_KEY, "p", "10.8.0.10/32", None).await.unwrap();

        mgr.control.set_fail_apply(true);
        let err = mgr.disable_peer(VALID_KEY).await.unwrap_err();
        assert!(matches!(err, AgentError::ControlPort(_)));

        // Device first: the store still says enabled and the peer is live
        let key: PublicKey = VALID_KEY.parse().unwrap();
        assert!(mgr.get_peer(VALID_KEY).await.unwrap().0.enabled);
        assert!(mgr.control.has_peer("wg0", &key).await);
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let mgr = peer_manager().await;
        mgr.add_peer(VALID_KEY, "p", "10.8.0.10/32", None).await.unwrap();

        let calls = mgr.control.apply_count();
        mgr.enable_peer(VALID_KEY).await.unwrap();
        assert_eq!(mgr.control.apply_count(), calls);
    }

    #[tokio::test]
    async fn test_unknown_peer_is_not_found() {
        let mgr = peer_manager().await;

        assert!(matches!(mgr.get_peer(VALID_KEY).await, Err(AgentError::NotFound(_))));
        assert!(matches!(mgr.disable_peer(VALID_KEY).await, Err(AgentError::NotFound(_))));
        assert!(matches!(mgr.enable_peer(VALID_KEY).await, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_peer_stats() {
        let mgr = peer_manager().await;
        mgr.add_peer(VALID_KEY, "p", "10.8.0.10/32", None).await.unwrap();

        let key: PublicKey = VALID_KEY.parse().unwrap();
        mgr.control.set_peer_traffic("wg0", &key, 10, 20, 1_700_000_000).await;

        let (_, stats) = mgr.get_peer(VALID_KEY).await.unwrap();
        assert_eq!(stats.unwrap().rx_bytes, 10);
    }

    #[tokio::test]
    async fn test_store_copy_on_read() {
        let store = PeerStore::new();
        let key = KeyPair::generate().public;
        store
            .add(PeerInfo {
                public_key: key.clone(),
                peer_id: "p".to_string(),
                allowed_ip: "10.8.0.10/32".parse().unwrap(),
                enabled: true,
            })
            .await;

        let mut copy = store.get(&key).await.unwrap();
        copy.enabled = false;
        assert!(store.get(&key).await.unwrap().enabled);
    }
}
