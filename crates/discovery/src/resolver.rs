//! Discovery resolver.
//!
//! A [`Resolver`] turns a possibly flaky node registry into a continuously
//! updated, ordered endpoint list. Building it fetches the current nodes and
//! opens a watch; afterwards two supervised background tasks run until the
//! resolver is closed:
//!
//! - the **event loop** applies watch and resync events to the node cache in
//!   delivery order and pushes the full address list downstream after every
//!   event;
//! - the **resync loop** re-fetches the full node list on a timer (or on
//!   [`Resolver::resolve_now`]) and feeds it to the event loop as a `Sync`
//!   event, bounding staleness when the watch silently drops messages.

use std::sync::Arc;
use std::time::Duration;

use corelib::{Node, NodeEvent, NodeType, ResolverState};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Span};

use crate::cache::NodeCache;
use crate::error::{DiscoveryError, Result};
use crate::registry::{NodeRegistry, NodeWatcher};
use crate::scheme::{Target, SCHEME_NAME};
use crate::supervisor::supervise;

/// Interval between full resyncs.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

const RESYNC_BUFFER: usize = 4;

/// Downstream consumer of resolved endpoints, usually the balancer.
pub trait ResolverClientConn: Send + Sync + 'static {
    /// Receive the complete, current endpoint set.
    fn update_state(&self, state: ResolverState) -> Result<()>;

    /// Receive a resolution failure. The last pushed state stays in effect.
    fn report_error(&self, error: DiscoveryError);
}

/// Builds [`Resolver`]s for `svc:///<service>` targets.
pub struct ResolverBuilder {
    registry: Arc<dyn NodeRegistry>,
    node_type: NodeType,
    tags: Vec<String>,
    resync_interval: Duration,
    span: Span,
}

impl ResolverBuilder {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            registry,
            node_type: NodeType::Grpc,
            tags: Vec::new(),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            span: Span::none(),
        }
    }

    /// Parent span for everything the resolvers log.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    /// Only resolve nodes carrying all of `tags`.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Interval between full resyncs. Must be non-zero; [`build`](Self::build)
    /// rejects a zero interval.
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn scheme(&self) -> &'static str {
        SCHEME_NAME
    }

    /// Resolve `target` and start watching it.
    ///
    /// Opening the watch and fetching the initial node list must both
    /// succeed; otherwise nothing is started and the error is returned.
    pub async fn build(&self, target: &Target, cc: Arc<dyn ResolverClientConn>) -> Result<Resolver> {
        if target.scheme != SCHEME_NAME {
            return Err(DiscoveryError::InvalidTarget {
                target: target.to_string(),
                reason: format!("scheme must be {SCHEME_NAME}"),
            });
        }
        if self.resync_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "resync interval must be non-zero".to_string(),
            ));
        }

        let service = target.service().to_string();
        let span = info_span!(parent: &self.span, "resolver", service = %service);

        let watcher = self.registry.watch(&service, self.node_type, &self.tags).await?;
        let nodes = self.registry.nodes(&service, self.node_type, &self.tags).await?;

        let cache = NodeCache::from_nodes(nodes);
        span.in_scope(|| info!(nodes = cache.len(), "resolver watching"));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (resync_tx, resync_rx) = mpsc::channel(RESYNC_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(cache.nodes()));
        let resolve_now = Arc::new(Notify::new());

        let event_loop = EventLoop {
            cache,
            watcher,
            resync: resync_rx,
            cc: Arc::clone(&cc),
            snapshot: snapshot_tx,
            shutdown: shutdown_rx.clone(),
        };

        let resync_loop = ResyncLoop {
            registry: Arc::clone(&self.registry),
            service,
            node_type: self.node_type,
            tags: self.tags.clone(),
            interval: self.resync_interval,
            events: resync_tx,
            cc,
            resolve_now: Arc::clone(&resolve_now),
            shutdown: shutdown_rx,
        };

        let tasks = vec![
            supervise("watch", span.clone(), event_loop.run()),
            supervise("resync", span.clone(), resync_loop.run()),
        ];

        Ok(Resolver {
            target: target.clone(),
            shutdown: shutdown_tx,
            resolve_now,
            snapshot: snapshot_rx,
            tasks,
            span,
        })
    }
}

/// Handle to a running resolution.
///
/// Dropping the handle closes the resolver.
pub struct Resolver {
    target: Target,
    shutdown: watch::Sender<bool>,
    resolve_now: Arc<Notify>,
    snapshot: watch::Receiver<Arc<Vec<Node>>>,
    tasks: Vec<JoinHandle<()>>,
    span: Span,
}

impl Resolver {
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Nodes as of the last applied event, ordered by id.
    pub fn nodes(&self) -> Arc<Vec<Node>> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Re-fetch the full node list now instead of waiting for the next tick.
    pub fn resolve_now(&self) {
        self.resolve_now.notify_one();
    }

    /// Stop the event loop and the resync timer.
    ///
    /// A registry fetch already in flight is not interrupted, so one more
    /// downstream update may still land after this returns.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            self.span.in_scope(|| info!("resolver closed"));
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Close and wait for the background tasks to end.
    pub async fn shutdown(mut self) {
        self.close();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.close();
    }
}

struct EventLoop {
    cache: NodeCache,
    watcher: NodeWatcher,
    resync: mpsc::Receiver<NodeEvent>,
    cc: Arc<dyn ResolverClientConn>,
    snapshot: watch::Sender<Arc<Vec<Node>>>,
    shutdown: watch::Receiver<bool>,
}

impl EventLoop {
    async fn run(mut self) -> Result<()> {
        self.publish();

        let mut watch_open = true;
        let mut resync_open = true;

        while watch_open || resync_open {
            tokio::select! {
                // A busy watch must not starve resync.
                biased;
                _ = self.shutdown.changed() => break,
                event = self.resync.recv(), if resync_open => match event {
                    Some(event) => self.apply(event),
                    None => {
                        warn!("resync stopped feeding events");
                        resync_open = false;
                    }
                },
                event = self.watcher.recv(), if watch_open => match event {
                    Some(event) => self.apply(event),
                    None => {
                        warn!("watch stream ended; relying on periodic resync");
                        watch_open = false;
                    }
                },
            }
        }

        debug!("event loop stopped");
        Ok(())
    }

    fn apply(&mut self, event: NodeEvent) {
        debug!(kind = ?event.kind, nodes = event.nodes.len(), "applying node event");
        self.cache.apply(event);
        self.publish();
    }

    /// Push the whole cache downstream. Never skipped, even when unchanged.
    fn publish(&self) {
        self.snapshot.send_replace(Arc::new(self.cache.nodes()));
        metrics::counter!("resolver_updates_total").increment(1);

        let state = ResolverState::new(self.cache.addresses());
        if let Err(e) = self.cc.update_state(state) {
            warn!(error = %e, "resolver update rejected downstream");
        }
    }
}

struct ResyncLoop {
    registry: Arc<dyn NodeRegistry>,
    service: String,
    node_type: NodeType,
    tags: Vec<String>,
    interval: Duration,
    events: mpsc::Sender<NodeEvent>,
    cc: Arc<dyn ResolverClientConn>,
    resolve_now: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl ResyncLoop {
    async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the build already fetched.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
                _ = self.resolve_now.notified() => ticker.reset(),
            }

            match self.registry.nodes(&self.service, self.node_type, &self.tags).await {
                Ok(nodes) => {
                    debug!(nodes = nodes.len(), "resync fetched nodes");
                    if self.events.send(NodeEvent::sync(nodes)).await.is_err() {
                        debug!("event loop gone; stopping resync");
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "resync failed");
                    metrics::counter!("resolver_resync_failures_total").increment(1);
                    self.cc.report_error(e);
                }
            }
        }

        debug!("resync loop stopped");
        Ok(())
    }
}
