//! Error types for the core library.

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A ring was requested with zero virtual nodes per member.
    #[error("replication factor must be greater than zero")]
    InvalidReplicationFactor,

    /// The member key is already placed on the ring.
    #[error("member {0} already exists in the ring")]
    MemberAlreadyExists(String),

    /// The member key was never placed on the ring.
    #[error("member {0} not found in the ring")]
    MemberNotFound(String),

    /// A lookup was attempted on a ring without members.
    #[error("hash ring is empty")]
    EmptyRing,
}
