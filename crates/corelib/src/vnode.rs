//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! Instead of each member having a single token on the ring, each member has
//! `replication_factor` tokens (virtual nodes). This provides:
//!
//! 1. **Better Load Distribution**: more tokens give a smoother share of the keyspace
//! 2. **Gradual Rebalancing**: when members join/leave, only the keys between
//!    the affected virtual nodes move
//! 3. **Fault Tolerance**: the keys of a failed member spread over many survivors
//!
//! # Performance Characteristics
//!
//! - **Memory**: O(v) per member where v = replication factor
//! - **Lookup**: O(log n) where n = total vnodes
//! - **Rebalancing**: O(k/m) keys move when a member joins/leaves (k = keys, m = members)

use crate::partitioner::Partitioner;
use crate::token::Token;
use std::fmt;
use std::sync::Arc;

/// A virtual node on the hash ring.
///
/// Represents a single token position owned by a member.
///
/// # Invariants
///
/// - Ordered by token first, then by member key. Two virtual nodes of
///   different members that collide on a token therefore still have a fixed
///   relative order, independent of insertion order.
/// - The member key is shared (`Arc<str>`) between all virtual nodes of a
///   member, so cloning a ring does not copy key strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    /// Token position on the ring.
    pub token: Token,

    /// Key of the member that owns this virtual node.
    pub member: Arc<str>,
}

impl VirtualNode {
    /// Create a new virtual node.
    #[inline]
    pub fn new(token: Token, member: Arc<str>) -> Self {
        Self { token, member }
    }

    /// Create the `vnode_index`-th virtual node of `member`.
    ///
    /// # Algorithm
    ///
    /// 1. Format the label `"{member}{vnode_index}"`
    /// 2. Hash the label with the ring's partitioner
    ///
    /// The label depends only on the member key and the index, so placement
    /// is identical on every client that uses the same partitioner.
    pub fn from_index(partitioner: &dyn Partitioner, member: &Arc<str>, vnode_index: u16) -> Self {
        let label = format!("{member}{vnode_index}");
        Self::new(partitioner.partition(label.as_bytes()), Arc::clone(member))
    }

    /// Lower bound used to start a clockwise walk at `token`.
    ///
    /// The empty key sorts before every member key, so a range starting at
    /// the probe includes every virtual node whose token equals `token`.
    pub(crate) fn probe(token: Token) -> Self {
        Self::new(token, Arc::from(""))
    }

    /// Get the token position.
    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Get the owning member key.
    #[inline]
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Calculate the clockwise distance to another virtual node.
    #[inline]
    pub fn distance_to(&self, other: &Self) -> u64 {
        self.token.distance_to(&other.token)
    }
}

impl fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VNode(token={}, member={})", self.token, self.member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioner::SipPartitioner;

    #[test]
    fn test_vnode_creation() {
        let vnode = VirtualNode::new(Token(100), Arc::from("a"));
        assert_eq!(vnode.token(), Token(100));
        assert_eq!(vnode.member(), "a");
    }

    #[test]
    fn test_vnode_from_index() {
        let key: Arc<str> = Arc::from("10.0.0.1:9000");
        let vnode0 = VirtualNode::from_index(&SipPartitioner, &key, 0);
        let vnode1 = VirtualNode::from_index(&SipPartitioner, &key, 1);

        assert_ne!(vnode0.token(), vnode1.token());
        assert_eq!(vnode0.member(), vnode1.member());
    }

    #[test]
    fn test_vnode_distance() {
        let vnode1 = VirtualNode::new(Token(100), Arc::from("a"));
        let vnode2 = VirtualNode::new(Token(200), Arc::from("b"));

        assert_eq!(vnode1.distance_to(&vnode2), 100);
    }

    #[test]
    fn test_vnode_ordering_breaks_ties_by_member() {
        let a = VirtualNode::new(Token(100), Arc::from("a"));
        let b = VirtualNode::new(Token(100), Arc::from("b"));
        let c = VirtualNode::new(Token(50), Arc::from("z"));

        assert!(c < a);
        assert!(a < b);
        assert!(VirtualNode::probe(Token(100)) < a);
    }
}
