//! Resolver behaviour against in-memory registries.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corelib::{Node, NodeEvent, NodeType, ResolverState};
use discovery::{
    DiscoveryError, MemoryRegistry, NodeRegistry, NodeWatcher, Register, ResolverBuilder,
    ResolverClientConn, Target,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct RecordingConn {
    states: Mutex<Vec<ResolverState>>,
    errors: Mutex<Vec<DiscoveryError>>,
}

impl RecordingConn {
    fn updates(&self) -> usize {
        self.states.lock().len()
    }

    fn last_ids(&self) -> Option<Vec<String>> {
        self.states.lock().last().map(|s| {
            s.addresses
                .iter()
                .map(|a| a.id.clone().unwrap_or_default())
                .collect()
        })
    }
}

impl ResolverClientConn for RecordingConn {
    fn update_state(&self, state: ResolverState) -> discovery::Result<()> {
        self.states.lock().push(state);
        Ok(())
    }

    fn report_error(&self, error: DiscoveryError) {
        self.errors.lock().push(error);
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn node(id: &str, port: u16) -> Node {
    Node::new("orders", "10.0.0.1", port, NodeType::Grpc).with_id(id)
}

fn ids(list: &[&str]) -> Option<Vec<String>> {
    Some(list.iter().map(|s| s.to_string()).collect())
}

/// Registry whose watch streams stay open but never deliver anything.
#[derive(Default)]
struct SilentWatchRegistry {
    inner: MemoryRegistry,
    senders: Mutex<Vec<mpsc::Sender<NodeEvent>>>,
    fail_nodes: AtomicBool,
    node_calls: AtomicUsize,
}

#[async_trait]
impl NodeRegistry for SilentWatchRegistry {
    async fn nodes(&self, service: &str, node_type: NodeType, tags: &[String]) -> discovery::Result<Vec<Node>> {
        self.node_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_nodes.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Registry {
                service: service.to_string(),
                reason: "registry unreachable".to_string(),
            });
        }
        self.inner.nodes(service, node_type, tags).await
    }

    async fn watch(&self, _: &str, _: NodeType, _: &[String]) -> discovery::Result<NodeWatcher> {
        let (tx, rx) = mpsc::channel(1);
        self.senders.lock().push(tx);
        Ok(rx)
    }
}

/// Registry whose watch streams never stop repeating the same event.
#[derive(Default)]
struct FloodingWatchRegistry {
    inner: MemoryRegistry,
}

#[async_trait]
impl NodeRegistry for FloodingWatchRegistry {
    async fn nodes(&self, service: &str, node_type: NodeType, tags: &[String]) -> discovery::Result<Vec<Node>> {
        self.inner.nodes(service, node_type, tags).await
    }

    async fn watch(&self, _: &str, _: NodeType, _: &[String]) -> discovery::Result<NodeWatcher> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while tx.send(NodeEvent::add(vec![node("a", 1)])).await.is_ok() {}
        });
        Ok(rx)
    }
}

struct BrokenWatchRegistry;

#[async_trait]
impl NodeRegistry for BrokenWatchRegistry {
    async fn nodes(&self, _: &str, _: NodeType, _: &[String]) -> discovery::Result<Vec<Node>> {
        Ok(Vec::new())
    }

    async fn watch(&self, service: &str, _: NodeType, _: &[String]) -> discovery::Result<NodeWatcher> {
        Err(DiscoveryError::Watch {
            service: service.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

// ============================================================================
// Build
// ============================================================================

#[tokio::test]
async fn test_build_pushes_initial_nodes_in_id_order() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register(&node("b", 2)).await.unwrap();
    registry.register(&node("a", 1)).await.unwrap();

    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();

    eventually("initial update", || conn.updates() >= 1).await;
    assert_eq!(conn.last_ids(), ids(&["a", "b"]));
    assert_eq!(resolver.nodes().len(), 2);
    assert_eq!(resolver.target().service(), "orders");
    resolver.shutdown().await;
}

#[tokio::test]
async fn test_build_fails_when_watch_fails() {
    let conn = Arc::new(RecordingConn::default());
    let err = ResolverBuilder::new(Arc::new(BrokenWatchRegistry))
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, DiscoveryError::Watch { .. }));
    assert_eq!(conn.updates(), 0);
}

#[tokio::test]
async fn test_build_fails_when_fetch_fails() {
    let registry = Arc::new(SilentWatchRegistry::default());
    registry.fail_nodes.store(true, Ordering::SeqCst);

    let conn = Arc::new(RecordingConn::default());
    let err = ResolverBuilder::new(registry)
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, DiscoveryError::Registry { .. }));
    assert_eq!(conn.updates(), 0);
}

#[tokio::test]
async fn test_build_rejects_foreign_scheme() {
    let target = Target::parse("dns:///orders").unwrap();
    let err = ResolverBuilder::new(Arc::new(MemoryRegistry::new()))
        .build(&target, Arc::new(RecordingConn::default()))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, DiscoveryError::InvalidTarget { .. }));
}

#[tokio::test]
async fn test_build_rejects_zero_resync_interval() {
    let registry = Arc::new(SilentWatchRegistry::default());
    let conn = Arc::new(RecordingConn::default());
    let err = ResolverBuilder::new(registry.clone())
        .with_resync_interval(Duration::ZERO)
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, DiscoveryError::InvalidConfig(_)));
    assert_eq!(conn.updates(), 0);
    assert!(registry.senders.lock().is_empty());
}

// ============================================================================
// Watch events
// ============================================================================

#[tokio::test]
async fn test_watch_events_flow_downstream() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register(&node("a", 1)).await.unwrap();

    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();
    eventually("initial update", || conn.updates() >= 1).await;

    registry.register(&node("c", 3)).await.unwrap();
    eventually("add", || conn.last_ids() == ids(&["a", "c"])).await;

    registry.deregister(&node("a", 1)).await.unwrap();
    eventually("remove", || conn.last_ids() == ids(&["c"])).await;

    // Initial push plus one update per event.
    assert_eq!(conn.updates(), 3);
    resolver.shutdown().await;
}

#[tokio::test]
async fn test_other_services_are_ignored() {
    let registry = Arc::new(MemoryRegistry::new());
    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .with_tags(["eu"])
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();
    eventually("initial update", || conn.updates() >= 1).await;

    registry
        .register(&Node::new("billing", "h", 1, NodeType::Grpc).with_tags(["eu"]))
        .await
        .unwrap();
    registry.register(&node("us", 1).with_tags(["us"])).await.unwrap();
    registry.register(&node("eu", 2).with_tags(["eu"])).await.unwrap();

    eventually("tagged add", || conn.last_ids() == ids(&["eu"])).await;
    assert_eq!(conn.updates(), 2);
    resolver.shutdown().await;
}

// ============================================================================
// Resync
// ============================================================================

#[tokio::test]
async fn test_resync_recovers_missed_events() {
    let registry = Arc::new(SilentWatchRegistry::default());
    registry.inner.register(&node("a", 1)).await.unwrap();

    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .with_resync_interval(Duration::from_millis(30))
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();
    eventually("initial update", || conn.last_ids() == ids(&["a"])).await;

    registry.inner.register(&node("b", 2)).await.unwrap();
    registry.inner.deregister(&node("a", 1)).await.unwrap();

    eventually("resync", || conn.last_ids() == ids(&["b"])).await;
    assert_eq!(resolver.nodes().len(), 1);
    resolver.shutdown().await;
}

#[tokio::test]
async fn test_unchanged_resync_still_publishes() {
    let registry = Arc::new(SilentWatchRegistry::default());
    registry.inner.register(&node("a", 1)).await.unwrap();

    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .with_resync_interval(Duration::from_millis(20))
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();

    eventually("repeated syncs", || conn.updates() >= 3).await;
    assert!(conn.states.lock().iter().all(|s| s.addresses.len() == 1));
    resolver.shutdown().await;
}

#[tokio::test]
async fn test_resolve_now_skips_the_wait() {
    let registry = Arc::new(SilentWatchRegistry::default());
    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();
    eventually("initial update", || conn.updates() >= 1).await;

    registry.inner.register(&node("a", 1)).await.unwrap();
    resolver.resolve_now();

    eventually("on-demand resync", || conn.last_ids() == ids(&["a"])).await;
    resolver.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resync_lands_while_watch_is_busy() {
    let registry = Arc::new(FloodingWatchRegistry::default());
    registry.inner.register(&node("a", 1)).await.unwrap();

    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .with_resync_interval(Duration::from_secs(3600))
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();
    eventually("watch traffic", || conn.updates() >= 10).await;

    registry.inner.register(&node("b", 2)).await.unwrap();
    resolver.resolve_now();

    eventually("resync during watch traffic", || resolver.nodes().len() == 2).await;
    resolver.shutdown().await;
}

#[tokio::test]
async fn test_resync_failure_is_reported_and_state_kept() {
    let registry = Arc::new(SilentWatchRegistry::default());
    registry.inner.register(&node("a", 1)).await.unwrap();

    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .with_resync_interval(Duration::from_millis(20))
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();
    eventually("initial update", || conn.updates() >= 1).await;

    registry.fail_nodes.store(true, Ordering::SeqCst);
    eventually("reported error", || !conn.errors.lock().is_empty()).await;

    assert!(matches!(conn.errors.lock()[0], DiscoveryError::Registry { .. }));
    assert_eq!(conn.last_ids(), ids(&["a"]));
    assert_eq!(resolver.nodes().len(), 1);
    resolver.shutdown().await;
}

// ============================================================================
// Shutdown and failure containment
// ============================================================================

#[tokio::test]
async fn test_shutdown_stops_updates() {
    let registry = Arc::new(SilentWatchRegistry::default());
    let conn = Arc::new(RecordingConn::default());
    let resolver = ResolverBuilder::new(registry.clone())
        .with_resync_interval(Duration::from_millis(10))
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();
    eventually("initial update", || conn.updates() >= 1).await;

    resolver.close();
    assert!(resolver.is_closed());
    resolver.shutdown().await;

    let settled = conn.updates();
    let calls = registry.node_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(conn.updates(), settled);
    assert_eq!(registry.node_calls.load(Ordering::SeqCst), calls);
}

struct PanickingConn {
    updates: AtomicUsize,
}

impl ResolverClientConn for PanickingConn {
    fn update_state(&self, state: ResolverState) -> discovery::Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if state.addresses.iter().any(|a| a.id.as_deref() == Some("boom")) {
            panic!("downstream blew up");
        }
        Ok(())
    }

    fn report_error(&self, _: DiscoveryError) {}
}

#[tokio::test]
async fn test_panic_in_event_loop_is_contained() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register(&node("a", 1)).await.unwrap();

    let conn = Arc::new(PanickingConn {
        updates: AtomicUsize::new(0),
    });
    let resolver = ResolverBuilder::new(registry.clone())
        .build(&Target::for_service("orders"), conn.clone())
        .await
        .unwrap();
    eventually("initial update", || conn.updates.load(Ordering::SeqCst) >= 1).await;

    registry.register(&node("boom", 2)).await.unwrap();
    eventually("panicking update", || conn.updates.load(Ordering::SeqCst) >= 2).await;

    // The loop is gone but the process and the resolver handle are fine.
    registry.register(&node("c", 3)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(conn.updates.load(Ordering::SeqCst), 2);
    assert!(!resolver.is_closed());
    resolver.shutdown().await;
}
