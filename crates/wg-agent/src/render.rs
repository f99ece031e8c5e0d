//! Client Config Rendering
//!
//! Renders the WireGuard configuration file handed to a newly created
//! client, and optionally encodes it as a QR image for mobile apps. QR
//! encoding is a non-critical capability: when it fails, the create
//! operation degrades to config-text-only.

use crate::device::DEFAULT_KEEPALIVE;
use crate::keys::{PrivateKey, PublicKey};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ipnet::IpNet;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Render the `[Interface]`/`[Peer]` config text for a client.
///
/// Pure and deterministic; the private key appears nowhere else in the
/// agent's output.
pub fn render_client_config(
    private_key: &PrivateKey,
    server_public_key: &PublicKey,
    server_endpoint: &str,
    allowed_ips: &str,
    dns: &str,
    client_address: IpNet,
) -> String {
    format!(
        "[Interface]\n\
         PrivateKey = {}\n\
         Address = {}\n\
         DNS = {}\n\
         \n\
         [Peer]\n\
         PublicKey = {}\n\
         AllowedIPs = {}\n\
         Endpoint = {}\n\
         PersistentKeepalive = {}\n",
        private_key.to_base64(),
        client_address,
        dns,
        server_public_key,
        allowed_ips,
        server_endpoint,
        DEFAULT_KEEPALIVE.as_secs(),
    )
}

/// Deep link that imports a config into WireGuard mobile apps
pub fn wireguard_link(config: &str) -> String {
    format!("wireguard://tunnels/add/{}", BASE64.encode(config))
}

/// QR encoding errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum QrError {
    /// No encoder is available on this host
    #[error("qr encoder unavailable: {0}")]
    Unavailable(String),

    /// The encoder ran but failed to produce an image
    #[error("qr encoding failed: {0}")]
    Failed(String),
}

/// Capability that turns config text into a QR image
pub trait QrEncoder: Send + Sync {
    fn encode(
        &self,
        config: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, QrError>> + Send;
}

/// QR adapter that shells out to the `qrencode` binary.
///
/// Produces PNG bytes on stdout; a missing binary maps to
/// [`QrError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QrencodeCli;

impl QrEncoder for QrencodeCli {
    async fn encode(&self, config: &str) -> Result<Vec<u8>, QrError> {
        let mut child = Command::new("qrencode")
            .args(["-t", "PNG", "-o", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| QrError::Unavailable(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(config.as_bytes())
                .await
                .map_err(|e| QrError::Failed(e.to_string()))?;
            // Dropping stdin closes the pipe so qrencode sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| QrError::Failed(e.to_string()))?;

        if !output.status.success() {
            return Err(QrError::Failed(format!("qrencode exited with {}", output.status)));
        }
        Ok(output.stdout)
    }
}

/// In-memory QR double for tests
pub struct MockQr {
    png: Vec<u8>,
    fail: AtomicBool,
}

impl MockQr {
    pub fn new() -> Self {
        Self {
            png: vec![0x89, b'P', b'N', b'G'],
            fail: AtomicBool::new(false),
        }
    }

    /// Make subsequent `encode` calls fail as unavailable
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockQr {
    fn default() -> Self {
        Self::new()
    }
}

impl QrEncoder for MockQr {
    async fn encode(&self, _config: &str) -> Result<Vec<u8>, QrError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QrError::Unavailable("mock encoder disabled".to_string()));
        }
        Ok(self.png.clone())
    }
}
