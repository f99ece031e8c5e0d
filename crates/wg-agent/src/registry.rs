//! Client Registry
//!
//! In-memory registry of VPN clients keyed by the external user id. Safe
//! for concurrent readers and writers; every read accessor hands out a
//! copy so callers can never mutate registry state from outside.
//!
//! The registry itself does not guard the existence-check-then-add
//! sequence: that spans a device call and belongs to the manager's
//! critical section.

use crate::keys::{PrivateKey, PublicKey};
use ipnet::IpNet;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tokio::sync::RwLock;

/// One VPN client bound to an external user id
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// External identifier; immutable; unique across the registry
    pub user_id: String,
    /// Public half of the key pair generated at creation
    pub public_key: PublicKey,
    /// Private half; surfaced only through the rendered client config
    pub private_key: PrivateKey,
    /// Allocated host address (/32 or /128); immutable once assigned
    pub address: IpNet,
    /// Whether the client's peer entry is expected on the live device
    pub enabled: bool,
}

/// Concurrent user-id-keyed store of client records
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientRecord>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a record, replacing any existing one for the same user id.
    /// The manager checks existence under its own lock before calling.
    pub async fn add(&self, record: ClientRecord) {
        self.clients.write().await.insert(record.user_id.clone(), record);
    }

    /// Look up a record by user id (defensive copy)
    pub async fn get(&self, user_id: &str) -> Option<ClientRecord> {
        self.clients.read().await.get(user_id).cloned()
    }

    /// Whether a record exists for this user id
    pub async fn contains(&self, user_id: &str) -> bool {
        self.clients.read().await.contains_key(user_id)
    }

    /// Flip the enabled flag in place; false if the record is absent
    pub async fn set_enabled(&self, user_id: &str, enabled: bool) -> bool {
        match self.clients.write().await.get_mut(user_id) {
            Some(record) => {
                record.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Remove a record; false if it was absent
    pub async fn remove(&self, user_id: &str) -> bool {
        self.clients.write().await.remove(user_id).is_some()
    }

    /// Snapshot of all records, order unspecified
    pub async fn list(&self) -> Vec<ClientRecord> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Host addresses (mask stripped) reserved by all records, enabled or
    /// not. A disabled client still holds its address.
    pub async fn used_addresses(&self) -> HashSet<IpAddr> {
        self.clients
            .read()
            .await
            .values()
            .map(|record| record.address.addr())
            .collect()
    }

    /// Number of registered clients
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
