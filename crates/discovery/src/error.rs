//! Error types for the discovery crate.

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors produced while resolving and watching services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// The target URI could not be used by this resolver.
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Fetching the node list from the registry failed.
    #[error("node query for service {service} failed: {reason}")]
    Registry { service: String, reason: String },

    /// Opening a watch on the registry failed.
    #[error("watch on service {service} failed: {reason}")]
    Watch { service: String, reason: String },

    /// The resolver settings cannot be used.
    #[error("invalid resolver config: {0}")]
    InvalidConfig(String),

    /// The node is not known to the registry.
    #[error("node not registered: {0}")]
    NodeNotFound(String),

    /// The component fed by the resolver refused the update.
    #[error("resolver state rejected: {0}")]
    Rejected(String),
}
