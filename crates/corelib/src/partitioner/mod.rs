//! Partitioner abstraction for consistent hashing.
//!
//! Partitioners are the ring's hash function: they convert keys (member
//! virtual-node labels and request routing keys alike) into tokens.

pub mod blake;
pub mod sip;
pub mod traits;
pub mod xxh3;

pub use blake::Blake3Partitioner;
pub use sip::SipPartitioner;
pub use traits::Partitioner;
pub use xxh3::Xxh3Partitioner;
