//! Consistent hash ring implementation.
//!
//! The ring places every member at `replication_factor` token positions and
//! answers "which members own this key" by walking clockwise from the key's
//! token.

pub mod member;
pub mod ring;

pub use member::Member;
pub use ring::{HashRing, DEFAULT_REPLICATION_FACTOR};
