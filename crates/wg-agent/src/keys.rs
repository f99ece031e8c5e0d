//! WireGuard Key Material
//!
//! X25519 key-pair generation and base64 encoding for client records and
//! peer entries. Keys are opaque 32-byte values; once generated for a
//! record they are never re-derived.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::rngs::OsRng;
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Decode a base64 string into exactly 32 key bytes
fn decode_key(s: &str) -> Result<[u8; 32], KeyError> {
    let bytes = BASE64.decode(s).map_err(|_| KeyError::InvalidBase64)?;
    bytes.try_into().map_err(|_| KeyError::InvalidLength)
}

/// WireGuard private key (Curve25519 scalar)
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    /// Generate a fresh random private key
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Parse from a base64-encoded 32-byte value
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        Ok(Self(StaticSecret::from(decode_key(s)?)))
    }

    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(X25519Public::from(&self.0))
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0.to_bytes())
    }
}

// Never print private key material, even at debug level.
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([redacted])")
    }
}

/// WireGuard public key (Curve25519 point)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(X25519Public);

impl PublicKey {
    /// Parse from a base64-encoded 32-byte value
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        Ok(Self(X25519Public::from(decode_key(s)?)))
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0.to_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_base64()[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

/// A generated key pair
///
/// The private half is only ever surfaced inside the rendered client
/// configuration; the public half identifies the peer on the device.
#[derive(Clone)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let private = PrivateKey::generate();
        let public = private.public_key();
        Self { private, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish()
    }
}

/// Key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("invalid key length (expected 32 bytes)")]
    InvalidLength,
}
