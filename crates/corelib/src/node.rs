//! Discoverable node model.
//!
//! A [`Node`] describes one endpoint of a logical service as reported by a
//! node registry. Nodes are value objects: an update replaces a node
//! wholesale, it is never patched in place.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;

/// Protocol spoken by a node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Grpc,
    Http,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Grpc => f.write_str("grpc"),
            NodeType::Http => f.write_str("http"),
        }
    }
}

/// One endpoint of a logical service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Identity; stable across restarts when the producer supplies one.
    #[serde(default = "generate_id")]
    pub id: String,
    /// Logical service name.
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Free-form labels used to filter registry queries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Node {
    /// Construct a node with a freshly generated identity.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, node_type: NodeType) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            host: host.into(),
            port,
            node_type,
            tags: Vec::new(),
        }
    }

    /// Use `id` as the identity. An empty id keeps the generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.id = id;
        }
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// `host:port` of the node.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True if the node carries every tag in `tags`.
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|tag| self.tags.contains(tag))
    }

    /// True if the node belongs to `service` and speaks `node_type`.
    pub fn matches(&self, service: &str, node_type: NodeType, tags: &[String]) -> bool {
        self.name == service && self.node_type == node_type && self.has_tags(tags)
    }

    /// Address handed to the balancer for this node.
    pub fn address(&self) -> Address {
        Address::new(self.endpoint()).with_id(self.id.clone())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}:{}", self.name, self.id, self.host, self.port)
    }
}

/// Kind of membership change carried by a [`NodeEvent`].
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEventKind {
    /// Nodes joined (or were replaced).
    Add,
    /// Nodes left.
    Remove,
    /// Authoritative full membership; replaces whatever was known before.
    Sync,
}

/// Membership change reported by a node registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub nodes: Vec<Node>,
}

impl NodeEvent {
    pub fn add(nodes: Vec<Node>) -> Self {
        Self { kind: NodeEventKind::Add, nodes }
    }

    pub fn remove(nodes: Vec<Node>) -> Self {
        Self { kind: NodeEventKind::Remove, nodes }
    }

    pub fn sync(nodes: Vec<Node>) -> Self {
        Self { kind: NodeEventKind::Sync, nodes }
    }
}
