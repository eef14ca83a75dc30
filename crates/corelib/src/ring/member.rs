//! Ring member abstraction.

use std::sync::Arc;

/// Something that can be placed on a [`HashRing`](super::HashRing).
///
/// The key alone decides placement: two members with the same key are the
/// same member as far as the ring is concerned.
pub trait Member: Clone + Send + Sync + 'static {
    /// Stable key used to derive the member's virtual nodes.
    fn key(&self) -> &str;
}

impl Member for String {
    fn key(&self) -> &str {
        self
    }
}

impl Member for Arc<str> {
    fn key(&self) -> &str {
        self
    }
}
