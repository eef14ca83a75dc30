//! In-process node registry.
//!
//! Useful for tests, local development and single-process deployments.
//! Every registered node holds a lease refreshed by
//! [`keep_alive`](Register::keep_alive); [`MemoryRegistry::expire`] drops
//! nodes whose lease lapsed, the way a TTL-based registry would.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use corelib::{Node, NodeEvent, NodeType};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::error::{DiscoveryError, Result};
use crate::registry::{NodeRegistry, NodeWatcher, Register};

/// Events buffered per watcher before new ones are dropped.
pub const DEFAULT_WATCH_BUFFER: usize = 64;

struct Lease {
    node: Node,
    last_seen: Instant,
}

struct Watcher {
    service: String,
    node_type: NodeType,
    tags: Vec<String>,
    tx: mpsc::Sender<NodeEvent>,
}

impl Watcher {
    fn wants(&self, node: &Node) -> bool {
        node.matches(&self.service, self.node_type, &self.tags)
    }

    fn send(&self, node: &Node, event: NodeEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(service = %self.service, node = %node.id, "watcher lagging; event dropped")
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Registry kept entirely in memory.
///
/// Watch notifications never block the registry: a watcher whose buffer is
/// full misses the event and has to catch up through a full resync.
pub struct MemoryRegistry {
    leases: DashMap<String, Lease>,
    watchers: Mutex<Vec<Watcher>>,
    watch_buffer: usize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::with_watch_buffer(DEFAULT_WATCH_BUFFER)
    }

    pub fn with_watch_buffer(watch_buffer: usize) -> Self {
        Self {
            leases: DashMap::new(),
            watchers: Mutex::new(Vec::new()),
            watch_buffer: watch_buffer.max(1),
        }
    }

    /// Drop every node whose lease is older than `ttl` and notify watchers.
    ///
    /// Returns the expired nodes.
    pub fn expire(&self, ttl: Duration) -> Vec<Node> {
        let now = Instant::now();
        let stale = self.stale_leases(now, ttl);
        self.remove_stale(&stale, now, ttl)
    }

    fn stale_leases(&self, now: Instant, ttl: Duration) -> Vec<String> {
        self.leases
            .iter()
            .filter(|lease| now.duration_since(lease.last_seen) > ttl)
            .map(|lease| lease.key().clone())
            .collect()
    }

    /// Remove the `stale` leases that are still older than `ttl` at `now`.
    ///
    /// A lease refreshed after the scan survives.
    fn remove_stale(&self, stale: &[String], now: Instant, ttl: Duration) -> Vec<Node> {
        let expired: Vec<Node> = stale
            .iter()
            .filter_map(|id| {
                self.leases
                    .remove_if(id, |_, lease| now.duration_since(lease.last_seen) > ttl)
            })
            .map(|(_, lease)| lease.node)
            .collect();

        for node in &expired {
            info!(node = %node, "node lease expired");
            self.notify(node, NodeEvent::remove(vec![node.clone()]));
        }
        expired
    }

    /// Number of registered nodes across all services.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Send `event` to every watcher interested in `node`.
    fn notify(&self, node: &Node, event: NodeEvent) {
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());

        for watcher in watchers.iter().filter(|w| w.wants(node)) {
            watcher.send(node, event.clone());
        }
    }

    /// Tell watchers that selected `previous` but not `current` that it is gone.
    fn notify_moved_out(&self, previous: &Node, current: &Node) {
        let event = NodeEvent::remove(vec![previous.clone()]);
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());

        for watcher in watchers.iter().filter(|w| w.wants(previous) && !w.wants(current)) {
            watcher.send(previous, event.clone());
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRegistry for MemoryRegistry {
    async fn nodes(&self, service: &str, node_type: NodeType, tags: &[String]) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .leases
            .iter()
            .filter(|lease| lease.node.matches(service, node_type, tags))
            .map(|lease| lease.node.clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn watch(&self, service: &str, node_type: NodeType, tags: &[String]) -> Result<NodeWatcher> {
        let (tx, rx) = mpsc::channel(self.watch_buffer);
        self.watchers.lock().push(Watcher {
            service: service.to_string(),
            node_type,
            tags: tags.to_vec(),
            tx,
        });
        debug!(service, %node_type, "watch opened");
        Ok(rx)
    }
}

#[async_trait]
impl Register for MemoryRegistry {
    async fn register(&self, node: &Node) -> Result<()> {
        let previous = self.leases.insert(
            node.id.clone(),
            Lease {
                node: node.clone(),
                last_seen: Instant::now(),
            },
        );

        // A replacement that moved out of a watcher's selection is a removal for that watcher.
        if let Some(previous) = previous {
            self.notify_moved_out(&previous.node, node);
        }

        info!(node = %node, "node registered");
        self.notify(node, NodeEvent::add(vec![node.clone()]));
        Ok(())
    }

    async fn keep_alive(&self, node: &Node) -> Result<()> {
        let mut lease = self
            .leases
            .get_mut(&node.id)
            .ok_or_else(|| DiscoveryError::NodeNotFound(node.id.clone()))?;
        lease.last_seen = Instant::now();
        Ok(())
    }

    async fn deregister(&self, node: &Node) -> Result<()> {
        if let Some((_, lease)) = self.leases.remove(&node.id) {
            info!(node = %lease.node, "node deregistered");
            self.notify(&lease.node, NodeEvent::remove(vec![lease.node.clone()]));
        }
        Ok(())
    }
}
