//! Agent Error Taxonomy
//!
//! Every lifecycle operation resolves to either a success value or exactly
//! one of these variants. Validation errors are produced before any state
//! is touched; `ControlPort` wraps a failure from the live device channel.

/// Errors returned by the client and peer lifecycle managers
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A request argument failed validation (empty user id, malformed
    /// public key or CIDR). Nothing was mutated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A client with this user id is already registered
    #[error("client already exists: {0}")]
    AlreadyExists(String),

    /// No client or peer is registered under this key
    #[error("not found: {0}")]
    NotFound(String),

    /// A required server setting is missing
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// The address pool of the configured subnet is exhausted
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Reading or reconfiguring the live device failed; the registry was
    /// left in its pre-call state
    #[error("control port: {0:#}")]
    ControlPort(#[source] anyhow::Error),
}
