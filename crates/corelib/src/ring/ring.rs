//! Member-keyed hash ring.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::partitioner::{Partitioner, SipPartitioner};
use crate::ring::member::Member;
use crate::vnode::VirtualNode;

/// Virtual nodes per member when the configuration does not say otherwise.
pub const DEFAULT_REPLICATION_FACTOR: u16 = 100;

/// Consistent hashing ring over members of type `M`.
///
/// Each member is mapped to `replication_factor` virtual nodes. A lookup
/// hashes the key with the same partitioner and walks clockwise from there,
/// collecting distinct members.
///
/// The ring is a plain value: it has no interior mutability and is cheap to
/// clone relative to rebuilding it, which lets callers share snapshots behind
/// an `Arc` and mutate copy-on-write.
#[derive(Clone)]
pub struct HashRing<M> {
    partitioner: Arc<dyn Partitioner>,
    replication_factor: u16,
    vnodes: BTreeSet<VirtualNode>,
    members: HashMap<Arc<str>, M>,
}

impl<M: Member> HashRing<M> {
    /// Create an empty ring.
    ///
    /// Fails if `replication_factor` is zero; callers are expected to apply
    /// [`DEFAULT_REPLICATION_FACTOR`] themselves when nothing is configured.
    pub fn new(partitioner: Arc<dyn Partitioner>, replication_factor: u16) -> Result<Self> {
        if replication_factor == 0 {
            return Err(Error::InvalidReplicationFactor);
        }

        Ok(Self {
            partitioner,
            replication_factor,
            vnodes: BTreeSet::new(),
            members: HashMap::new(),
        })
    }

    /// Create an empty ring hashed with [`SipPartitioner`].
    pub fn with_replication_factor(replication_factor: u16) -> Result<Self> {
        Self::new(Arc::new(SipPartitioner), replication_factor)
    }

    /// Place `member` on the ring.
    ///
    /// Adding a key that is already present is rejected with
    /// [`Error::MemberAlreadyExists`] and leaves the ring untouched.
    pub fn add(&mut self, member: M) -> Result<()> {
        if self.members.contains_key(member.key()) {
            return Err(Error::MemberAlreadyExists(member.key().to_string()));
        }

        let key: Arc<str> = Arc::from(member.key());
        for i in 0..self.replication_factor {
            self.vnodes
                .insert(VirtualNode::from_index(self.partitioner.as_ref(), &key, i));
        }

        debug!(member = %key, vnodes = self.replication_factor, "added member to ring");
        self.members.insert(key, member);
        Ok(())
    }

    /// Remove `member` (matched by key) and all of its virtual nodes.
    ///
    /// Returns the member that was stored on the ring.
    pub fn remove(&mut self, member: &M) -> Result<M> {
        self.remove_key(member.key())
    }

    /// Remove the member stored under `key`.
    pub fn remove_key(&mut self, key: &str) -> Result<M> {
        let (key, member) = self
            .members
            .remove_entry(key)
            .ok_or_else(|| Error::MemberNotFound(key.to_string()))?;

        for i in 0..self.replication_factor {
            self.vnodes
                .remove(&VirtualNode::from_index(self.partitioner.as_ref(), &key, i));
        }

        debug!(member = %key, "removed member from ring");
        Ok(member)
    }

    /// Find the `n` distinct members that own `key`.
    ///
    /// Walks clockwise from the key's token, wrapping once, and returns at
    /// most `min(n, member_count)` members in ring order (primary owner
    /// first). `n == 0` is treated as 1.
    pub fn find_n(&self, key: &[u8], n: usize) -> Result<Vec<M>> {
        if self.members.is_empty() {
            return Err(Error::EmptyRing);
        }

        let wanted = n.max(1).min(self.members.len());
        let probe = VirtualNode::probe(self.partitioner.partition(key));

        let after = self.vnodes.range(probe.clone()..);
        let before = self.vnodes.range(..probe);

        let mut owners: Vec<&Arc<str>> = Vec::with_capacity(wanted);
        for vnode in after.chain(before) {
            if owners.iter().any(|owner| **owner == vnode.member) {
                continue;
            }
            owners.push(&vnode.member);
            if owners.len() == wanted {
                break;
            }
        }

        Ok(owners
            .into_iter()
            .filter_map(|key| self.members.get(key).cloned())
            .collect())
    }

    /// Find the primary owner of `key`.
    pub fn find(&self, key: &[u8]) -> Result<M> {
        self.find_n(key, 1)?.pop().ok_or(Error::EmptyRing)
    }

    /// Build a ring with a different replication factor holding the same
    /// members and partitioner.
    pub fn rebuild(&self, replication_factor: u16) -> Result<Self> {
        let mut ring = Self::new(Arc::clone(&self.partitioner), replication_factor)?;
        for member in self.members() {
            ring.add(member)?;
        }
        Ok(ring)
    }

    /// All members, ordered by key.
    pub fn members(&self) -> Vec<M> {
        let mut keys: Vec<&Arc<str>> = self.members.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| self.members.get(key).cloned())
            .collect()
    }

    /// Look up a member by key.
    pub fn get(&self, key: &str) -> Option<&M> {
        self.members.get(key)
    }

    /// True if a member with `key` is on the ring.
    pub fn contains(&self, key: &str) -> bool {
        self.members.contains_key(key)
    }

    /// Share of the keyspace owned by each member, ordered by key.
    ///
    /// A virtual node owns the arc from its predecessor (exclusive) up to its
    /// own token (inclusive), which is exactly the set of tokens a clockwise
    /// lookup resolves to it.
    pub fn ownership(&self) -> Vec<(String, f64)> {
        let mut owned: HashMap<&str, u128> = HashMap::new();

        if self.vnodes.len() == 1 {
            if let Some(vnode) = self.vnodes.first() {
                owned.insert(vnode.member(), 1u128 << 64);
            }
        } else if let Some(last) = self.vnodes.last() {
            let mut prev = last;
            for vnode in &self.vnodes {
                *owned.entry(vnode.member()).or_default() += u128::from(prev.distance_to(vnode));
                prev = vnode;
            }
        }

        let ring_size = (1u128 << 64) as f64;
        let mut shares: Vec<(String, f64)> = self
            .members
            .keys()
            .map(|key| {
                let arc = owned.get(key.as_ref()).copied().unwrap_or_default();
                (key.to_string(), arc as f64 / ring_size)
            })
            .collect();
        shares.sort_by(|a, b| a.0.cmp(&b.0));
        shares
    }

    /// Number of members on the ring.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Number of virtual nodes on the ring.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    /// True if the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Virtual nodes per member.
    pub fn replication_factor(&self) -> u16 {
        self.replication_factor
    }

    /// Name of the partitioner hashing this ring.
    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }
}

impl<M> fmt::Debug for HashRing<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRing")
            .field("partitioner", &self.partitioner.name())
            .field("replication_factor", &self.replication_factor)
            .field("members", &self.members.len())
            .field("vnodes", &self.vnodes.len())
            .finish()
    }
}
