//! wg-agent - WireGuard Peer Provisioning Core
//!
//! Control-plane agent core that provisions and manages VPN peers on a
//! WireGuard interface on behalf of remote callers. It keeps an
//! authoritative in-memory registry of clients synchronized with the live
//! device peer table, allocating unique addresses and rolling back cleanly
//! when one of the two stores fails mid-operation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Agent Process                        │
//! │                                                          │
//! │  ┌───────────┐   ┌─────────────────┐   ┌─────────────┐   │
//! │  │ Transport │──▶│ ClientManager / │──▶│  WgControl  │   │
//! │  │ (caller)  │   │   PeerManager   │   │ (device)    │   │
//! │  └───────────┘   └───────┬─────────┘   └──────┬──────┘   │
//! │                          │                    │          │
//! │                  ┌───────▼────────┐           ▼          │
//! │                  │ ClientRegistry │     wg0 peer table   │
//! │                  │   PeerStore    │                      │
//! │                  └────────────────┘                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency
//!
//! The registry and the device peer table are independently mutable with
//! no shared transaction. The managers therefore update the device before
//! committing registry state, serialize mutations behind one lock, and
//! treat deletion as best-effort device cleanup. See [`manager`] for the
//! full ordering rule.
//!
//! State is process-lifetime only; the registry starts empty on restart.

mod allocator;
mod config;
mod device;
mod error;
mod keys;
mod manager;
mod peers;
mod registry;
mod render;

pub use allocator::{NoCapacity, allocate};
pub use config::{AgentConfig, ConfigError};
pub use device::{
    DEFAULT_KEEPALIVE, DeviceInfo, DevicePeer, MockWgControl, PeerDelta, PeerStats, WgControl,
};
pub use error::AgentError;
pub use keys::{KeyError, KeyPair, PrivateKey, PublicKey};
pub use manager::{
    ClientManager, ClientView, CreateOptions, DEFAULT_ALLOWED_IPS, DEFAULT_DNS, ManagerSettings,
    NewClient,
};
pub use peers::{PeerInfo, PeerManager, PeerStore, ServerInfo};
pub use registry::{ClientRecord, ClientRegistry};
pub use render::{MockQr, QrEncoder, QrError, QrencodeCli, render_client_config, wireguard_link};
