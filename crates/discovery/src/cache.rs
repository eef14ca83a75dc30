//! Authoritative node cache maintained by the resolver.

use std::collections::BTreeMap;

use corelib::{Address, Node, NodeEvent, NodeEventKind};

/// Nodes of one service keyed by identity.
///
/// Ordered by node id so that every resolution hands the balancer the same
/// address order for the same membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCache {
    nodes: BTreeMap<String, Node>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let mut cache = Self::new();
        cache.insert_all(nodes);
        cache
    }

    /// Apply one membership event.
    ///
    /// `Sync` replaces the whole cache with the event's nodes.
    pub fn apply(&mut self, event: NodeEvent) {
        match event.kind {
            NodeEventKind::Add => self.insert_all(event.nodes),
            NodeEventKind::Remove => {
                for node in &event.nodes {
                    self.nodes.remove(&node.id);
                }
            }
            NodeEventKind::Sync => {
                self.nodes.clear();
                self.insert_all(event.nodes);
            }
        }
    }

    fn insert_all(&mut self, nodes: Vec<Node>) {
        for node in nodes {
            self.nodes.insert(node.id.clone(), node);
        }
    }

    /// Cached nodes ordered by id.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }

    /// Addresses of the cached nodes ordered by node id.
    pub fn addresses(&self) -> Vec<Address> {
        self.nodes.values().map(Node::address).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
