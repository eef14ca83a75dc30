//! Error types for the balancer.

use thiserror::Error;

/// Errors surfaced by the balancer and its pickers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// An address update arrived before any configuration built the ring.
    #[error("no hash ring configured")]
    NoHashring,

    /// The resolver handed over an unusable state, such as no addresses.
    #[error("bad resolver state")]
    BadResolverState,

    #[error("invalid balancer config: {0}")]
    InvalidConfig(String),

    #[error("hash ring: {0}")]
    Ring(#[from] corelib::Error),

    #[error("no sub-connection available")]
    NoSubConnAvailable,

    /// The call cannot be routed right now.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("resolver: {0}")]
    Resolver(String),

    #[error("sub-connection: {0}")]
    SubConn(String),
}

/// Result alias for balancer operations.
pub type Result<T> = std::result::Result<T, BalancerError>;

/// Combine the last connection and resolver errors into the error an error
/// picker hands out.
pub(crate) fn join_errors(conn: Option<&BalancerError>, resolver: Option<&BalancerError>) -> BalancerError {
    let parts: Vec<String> = [conn, resolver].into_iter().flatten().map(ToString::to_string).collect();
    if parts.is_empty() {
        BalancerError::NoSubConnAvailable
    } else {
        BalancerError::Unavailable(parts.join("; "))
    }
}
