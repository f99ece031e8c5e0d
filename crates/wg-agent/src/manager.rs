//! Client Lifecycle Manager
//!
//! Orchestrates the client registry, the address allocator, and the live
//! device control port, and keeps the two stores consistent. Per client
//! the state machine is:
//!
//! ```text
//! absent -> enabled <-> disabled -> absent
//! ```
//!
//! # Ordering rule
//!
//! Every mutating operation updates the live device *before* the registry
//! reflects the new intended state, so the registry never claims a peer is
//! live when it is not. Deletion is the one exception: the device removal
//! is best effort and the record is erased regardless, because an orphaned
//! live peer beats an un-deletable client record.
//!
//! Mutating operations are serialized by a single manager-level lock held
//! across the existence check, the allocation, the device call, and the
//! registry commit. Once an operation has entered, it runs the device
//! round trip to completion; there is no mid-operation cancellation.

use crate::allocator::allocate;
use crate::config::{AgentConfig, ConfigError};
use crate::device::{DEFAULT_KEEPALIVE, PeerDelta, PeerStats, WgControl};
use crate::error::AgentError;
use crate::keys::{KeyPair, PublicKey};
use crate::registry::{ClientRecord, ClientRegistry};
use crate::render::{QrEncoder, QrencodeCli, render_client_config};
use ipnet::IpNet;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Default allowed IPs in generated client configs: route everything
pub const DEFAULT_ALLOWED_IPS: &str = "0.0.0.0/0";

/// Default DNS servers in generated client configs
pub const DEFAULT_DNS: &str = "1.1.1.1, 1.0.0.1";

/// Static manager settings, fixed for the life of the instance
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// WireGuard interface the manager drives
    pub interface: String,
    /// Subnet client addresses are drawn from
    pub subnet: IpNet,
    /// Endpoint handed to clients; `None` refuses client creation
    pub server_endpoint: Option<String>,
}

impl ManagerSettings {
    /// Build settings from the process configuration
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            interface: config.interface.clone(),
            subnet: config.subnet()?,
            server_endpoint: config.server_endpoint(),
        })
    }
}

/// Per-create overrides for the rendered client config
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Allowed-IPs line, defaults to [`DEFAULT_ALLOWED_IPS`]
    pub allowed_ips: Option<String>,
    /// DNS line, defaults to [`DEFAULT_DNS`]
    pub dns: Option<String>,
}

/// Result of a successful client creation
#[derive(Debug, Clone)]
pub struct NewClient {
    /// The registered record, including the generated key pair
    pub record: ClientRecord,
    /// Rendered client configuration file
    pub config: String,
    /// PNG QR image of the config; absent when the encoder is unavailable
    pub qr_png: Option<Vec<u8>>,
}

/// Read-model view of a client, optionally augmented with live stats
#[derive(Debug, Clone)]
pub struct ClientView {
    pub user_id: String,
    pub public_key: PublicKey,
    pub address: IpNet,
    pub enabled: bool,
    /// Present only for enabled clients with a reachable device
    pub stats: Option<PeerStats>,
}

impl ClientView {
    fn new(record: ClientRecord, stats: Option<PeerStats>) -> Self {
        Self {
            user_id: record.user_id,
            public_key: record.public_key,
            address: record.address,
            enabled: record.enabled,
            stats,
        }
    }
}

/// The userID-keyed client lifecycle manager
pub struct ClientManager<C, Q = QrencodeCli> {
    settings: ManagerSettings,
    registry: ClientRegistry,
    control: C,
    qr: Q,
    /// Serializes mutating operations across device call and registry commit
    op: Mutex<()>,
}

impl<C: WgControl> ClientManager<C> {
    /// Manager with the default `qrencode` QR adapter
    pub fn new(settings: ManagerSettings, control: C) -> Self {
        Self::with_qr(settings, control, QrencodeCli)
    }
}

impl<C: WgControl, Q: QrEncoder> ClientManager<C, Q> {
    /// Manager with a caller-supplied QR encoder
    pub fn with_qr(settings: ManagerSettings, control: C, qr: Q) -> Self {
        Self {
            settings,
            registry: ClientRegistry::new(),
            control,
            qr,
            op: Mutex::new(()),
        }
    }

    /// Create a new client: generate keys, allocate the lowest free
    /// address, install the live peer, then register the record.
    ///
    /// The registry is only touched after the device accepted the peer, so
    /// a failed install leaves no trace. QR encoding is best effort.
    pub async fn create(
        &self,
        user_id: &str,
        opts: CreateOptions,
    ) -> Result<NewClient, AgentError> {
        if user_id.is_empty() {
            return Err(AgentError::InvalidArgument("user_id must not be empty".to_string()));
        }

        let _guard = self.op.lock().await;

        if self.registry.contains(user_id).await {
            return Err(AgentError::AlreadyExists(user_id.to_string()));
        }
        let endpoint = self
            .settings
            .server_endpoint
            .clone()
            .ok_or(AgentError::NotConfigured("server endpoint"))?;

        let keys = KeyPair::generate();

        // Merge registry reservations with addresses of externally-managed
        // peers already on the device, so we never collide with either.
        let device = self
            .control
            .device(&self.settings.interface)
            .await
            .map_err(AgentError::ControlPort)?;
        let mut used = self.registry.used_addresses().await;
        for peer in &device.peers {
            for net in &peer.allowed_ips {
                used.insert(net.addr());
            }
        }

        let address = allocate(self.settings.subnet, &used)
            .map_err(|e| AgentError::ResourceExhausted(e.to_string()))?;

        // Device first; on failure nothing has been committed.
        self.control
            .apply(
                &self.settings.interface,
                PeerDelta::Upsert {
                    public_key: keys.public.clone(),
                    allowed_ip: address,
                    keepalive: DEFAULT_KEEPALIVE,
                },
            )
            .await
            .map_err(AgentError::ControlPort)?;

        let record = ClientRecord {
            user_id: user_id.to_string(),
            public_key: keys.public,
            private_key: keys.private,
            address,
            enabled: true,
        };
        self.registry.add(record.clone()).await;

        let config = render_client_config(
            &record.private_key,
            &device.public_key,
            &endpoint,
            opts.allowed_ips.as_deref().unwrap_or(DEFAULT_ALLOWED_IPS),
            opts.dns.as_deref().unwrap_or(DEFAULT_DNS),
            address,
        );

        let qr_png = match self.qr.encode(&config).await {
            Ok(png) => Some(png),
            Err(e) => {
                // Non-critical: the client still gets the config text
                warn!("QR encoding failed for {}: {}", user_id, e);
                None
            }
        };

        info!("Client created: {} -> {}", user_id, address);
        Ok(NewClient { record, config, qr_png })
    }

    /// Re-install a disabled client's peer and mark it enabled.
    /// A no-op for clients that are already enabled.
    pub async fn enable(&self, user_id: &str) -> Result<(), AgentError> {
        let _guard = self.op.lock().await;

        let record = self
            .registry
            .get(user_id)
            .await
            .ok_or_else(|| AgentError::NotFound(user_id.to_string()))?;
        if record.enabled {
            return Ok(());
        }

        self.control
            .apply(
                &self.settings.interface,
                PeerDelta::Upsert {
                    public_key: record.public_key,
                    allowed_ip: record.address,
                    keepalive: DEFAULT_KEEPALIVE,
                },
            )
            .await
            .map_err(AgentError::ControlPort)?;

        self.registry.set_enabled(user_id, true).await;
        info!("Client enabled: {}", user_id);
        Ok(())
    }

    /// Remove an enabled client's peer from the device and mark it
    /// disabled. The flag only flips after the device removal succeeded;
    /// a failed removal surfaces and leaves the client enabled.
    pub async fn disable(&self, user_id: &str) -> Result<(), AgentError> {
        let _guard = self.op.lock().await;

        let record = self
            .registry
            .get(user_id)
            .await
            .ok_or_else(|| AgentError::NotFound(user_id.to_string()))?;
        if !record.enabled {
            return Ok(());
        }

        self.control
            .apply(
                &self.settings.interface,
                PeerDelta::Remove { public_key: record.public_key },
            )
            .await
            .map_err(AgentError::ControlPort)?;

        self.registry.set_enabled(user_id, false).await;
        info!("Client disabled: {}", user_id);
        Ok(())
    }

    /// Delete a client. The device removal is attempted first for enabled
    /// clients but a failure there never blocks erasing the record.
    pub async fn delete(&self, user_id: &str) -> Result<(), AgentError> {
        let _guard = self.op.lock().await;

        let record = self
            .registry
            .get(user_id)
            .await
            .ok_or_else(|| AgentError::NotFound(user_id.to_string()))?;

        if record.enabled {
            let delta = PeerDelta::Remove { public_key: record.public_key };
            if let Err(e) = self.control.apply(&self.settings.interface, delta).await {
                warn!("Device removal failed during delete of {}: {:#}", user_id, e);
            }
        }

        self.registry.remove(user_id).await;
        info!("Client deleted: {}", user_id);
        Ok(())
    }

    /// Look up one client, with live stats for enabled clients
    pub async fn get(&self, user_id: &str) -> Result<ClientView, AgentError> {
        let record = self
            .registry
            .get(user_id)
            .await
            .ok_or_else(|| AgentError::NotFound(user_id.to_string()))?;

        let stats = if record.enabled {
            self.stats_by_key().await.remove(&record.public_key)
        } else {
            None
        };
        Ok(ClientView::new(record, stats))
    }

    /// Snapshot of all clients; one device read augments every enabled
    /// record with stats
    pub async fn list(&self) -> Vec<ClientView> {
        let records = self.registry.list().await;

        let stats = if records.iter().any(|r| r.enabled) {
            self.stats_by_key().await
        } else {
            HashMap::new()
        };

        records
            .into_iter()
            .map(|record| {
                let s = if record.enabled {
                    stats.get(&record.public_key).copied()
                } else {
                    None
                };
                ClientView::new(record, s)
            })
            .collect()
    }

    /// Read the device peer table keyed by public key. An unreachable
    /// device degrades reads to stats-absent instead of failing them.
    async fn stats_by_key(&self) -> HashMap<PublicKey, PeerStats> {
        match self.control.device(&self.settings.interface).await {
            Ok(device) => device
                .peers
                .into_iter()
                .map(|peer| (peer.public_key.clone(), peer.stats()))
                .collect(),
            Err(e) => {
                warn!("Device read for stats failed: {:#}", e);
                HashMap::new()
            }
        }
    }
}
