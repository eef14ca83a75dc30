//! Node registry interfaces.
//!
//! The registry itself (a key-value store, a discovery service, ...) lives
//! outside this crate; the resolver only needs to query it and watch it.

use async_trait::async_trait;
use corelib::{Node, NodeEvent, NodeType};
use tokio::sync::mpsc;

use crate::error::Result;

/// Stream of membership changes for one watched service.
///
/// The stream ends when the registry drops its sending half.
pub type NodeWatcher = mpsc::Receiver<NodeEvent>;

/// Consumer side of a node registry.
#[async_trait]
pub trait NodeRegistry: Send + Sync + 'static {
    /// Current nodes of `service` speaking `node_type` and carrying every tag in `tags`.
    async fn nodes(&self, service: &str, node_type: NodeType, tags: &[String]) -> Result<Vec<Node>>;

    /// Open a stream of membership changes for the same selection as [`nodes`](Self::nodes).
    async fn watch(&self, service: &str, node_type: NodeType, tags: &[String]) -> Result<NodeWatcher>;
}

/// Producer side of a node registry, used by servers announcing themselves.
#[async_trait]
pub trait Register: Send + Sync + 'static {
    /// Announce `node`, replacing any node with the same id.
    async fn register(&self, node: &Node) -> Result<()>;

    /// Refresh the lease of a registered node.
    async fn keep_alive(&self, node: &Node) -> Result<()>;

    /// Withdraw `node`. Withdrawing an unknown node is not an error.
    async fn deregister(&self, node: &Node) -> Result<()>;
}
