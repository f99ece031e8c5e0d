//! Agent Settings
//!
//! Process configuration loaded from environment variables, mirroring the
//! deployment contract of the agent:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `WG_AGENT_INTERFACE` | `wg0` | Managed WireGuard interface |
//! | `WG_SUBNET` | `10.8.0.0/24` | Subnet client addresses come from |
//! | `SERVER_PUBLIC_IP` | unset | Public host clients connect to |
//! | `WG_SERVER_PORT` | `51820` | WireGuard UDP port on the server |

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::env;

/// Agent process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// WireGuard interface the agent manages
    pub interface: String,
    /// Subnet for client address allocation, CIDR notation
    pub subnet: String,
    /// Public IP or hostname clients use to reach the server; without it
    /// client creation is refused as not configured
    pub server_public_ip: Option<String>,
    /// WireGuard UDP port on the server
    pub server_port: u16,
}

impl AgentConfig {
    /// Load from environment variables, falling back to defaults.
    /// An unparsable port keeps the default rather than failing startup.
    pub fn from_env() -> Self {
        let server_port = env::var("WG_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(51820);

        Self {
            interface: env_or("WG_AGENT_INTERFACE", "wg0"),
            subnet: env_or("WG_SUBNET", "10.8.0.0/24"),
            server_public_ip: env::var("SERVER_PUBLIC_IP").ok().filter(|v| !v.is_empty()),
            server_port,
        }
    }

    /// The endpoint handed to clients, `host:port`, or `None` when the
    /// public IP is not set
    pub fn server_endpoint(&self) -> Option<String> {
        self.server_public_ip
            .as_ref()
            .map(|host| format!("{}:{}", host, self.server_port))
    }

    /// Parse the configured allocation subnet
    pub fn subnet(&self) -> Result<IpNet, ConfigError> {
        self.subnet
            .parse()
            .map_err(|_| ConfigError::InvalidSubnet(self.subnet.clone()))
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interface: "wg0".to_string(),
            subnet: "10.8.0.0/24".to_string(),
            server_public_ip: None,
            server_port: 51820,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();

        assert_eq!(config.interface, "wg0");
        assert_eq!(config.subnet().unwrap(), "10.8.0.0/24".parse().unwrap());
        assert_eq!(config.server_port, 51820);
        assert!(config.server_endpoint().is_none());
    }

    #[test]
    fn test_server_endpoint() {
        let config = AgentConfig {
            server_public_ip: Some("vpn.example.com".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(config.server_endpoint().unwrap(), "vpn.example.com:51820");
    }

    // Sole test touching the process environment; keep it that way so it
    // cannot race other tests in this binary.
    #[test]
    fn test_from_env() {
        unsafe {
            env::set_var("WG_AGENT_INTERFACE", "wg1");
            env::set_var("WG_SUBNET", "10.9.0.0/24");
            env::set_var("SERVER_PUBLIC_IP", "198.51.100.7");
            env::set_var("WG_SERVER_PORT", "51821");
        }
        let config = AgentConfig::from_env();
        assert_eq!(config.interface, "wg1");
        assert_eq!(config.subnet, "10.9.0.0/24");
        assert_eq!(config.server_endpoint().unwrap(), "198.51.100.7:51821");

        // Unparsable port keeps the default instead of failing startup
        unsafe {
            env::set_var("WG_SERVER_PORT", "not-a-port");
        }
        assert_eq!(AgentConfig::from_env().server_port, 51820);

        unsafe {
            env::remove_var("WG_AGENT_INTERFACE");
            env::remove_var("WG_SUBNET");
            env::remove_var("SERVER_PUBLIC_IP");
            env::remove_var("WG_SERVER_PORT");
        }
        let config = AgentConfig::from_env();
        assert_eq!(config.interface, "wg0");
        assert_eq!(config.subnet, "10.8.0.0/24");
        assert!(config.server_public_ip.is_none());
        assert_eq!(config.server_port, 51820);
    }

    #[test]
    fn test_invalid_subnet() {
        let config = AgentConfig {
            subnet: "not-a-subnet".to_string(),
            ..AgentConfig::default()
        };
        assert!(matches!(config.subnet(), Err(ConfigError::InvalidSubnet(_))));
    }
}
