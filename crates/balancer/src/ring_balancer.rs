//! The `consistent-hashring` balancer.
//!
//! The balancer keeps one connection handle per resolved address and places
//! each handle on a hash ring keyed by node identity. After every change it
//! publishes an aggregate connectivity state and a picker to the
//! [`ClientConn`].
//!
//! # Ownership
//!
//! Callbacks take `&mut self`: the transport delivers them one at a time.
//! The ring lives behind an `Arc` and is mutated copy-on-write, so pickers
//! already handed out keep routing over the ring they were built with.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use corelib::partitioner::SipPartitioner;
use corelib::{Address, HashRing, Partitioner};
use tracing::{debug, info, info_span, warn, Span};

use crate::config::{BalancerConfig, BALANCER_NAME, DEFAULT_SPREAD};
use crate::connectivity::{ConnectivityState, ConnectivityStateEvaluator};
use crate::error::{join_errors, BalancerError, Result};
use crate::member::SubConnMember;
use crate::picker::{ErrPicker, Picker, RingPicker};
use crate::transport::{BalancerState, ClientConn, ClientConnState, SubConn, SubConnId, SubConnState};

/// Creates [`RingBalancer`]s.
#[derive(Debug, Clone)]
pub struct Builder {
    partitioner: Arc<dyn Partitioner>,
    span: Span,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new(Arc::new(SipPartitioner))
    }
}

impl Builder {
    /// Builder whose rings hash with `partitioner`.
    pub fn new(partitioner: Arc<dyn Partitioner>) -> Self {
        Self {
            partitioner,
            span: Span::none(),
        }
    }

    /// Parent span for everything the balancers log.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn name(&self) -> &'static str {
        BALANCER_NAME
    }

    /// Parse policy JSON, applying defaults.
    pub fn parse_config(&self, json: &str) -> Result<BalancerConfig> {
        let config = BalancerConfig::parse(json)?;
        self.span.in_scope(|| info!(?config, "parsed balancer config"));
        Ok(config)
    }

    pub fn build(&self, cc: Arc<dyn ClientConn>) -> RingBalancer {
        RingBalancer {
            cc,
            partitioner: Arc::clone(&self.partitioner),
            span: info_span!(parent: &self.span, "balancer", policy = BALANCER_NAME),
            state: ConnectivityState::Connecting,
            picker: Arc::new(ErrPicker::new(BalancerError::NoSubConnAvailable)),
            evaluator: ConnectivityStateEvaluator::new(),
            sub_conns: BTreeMap::new(),
            sc_states: HashMap::new(),
            config: None,
            ring: None,
            resolver_err: None,
            conn_err: None,
        }
    }
}

/// Balancer routing calls over a consistent-hash ring of connection handles.
pub struct RingBalancer {
    cc: Arc<dyn ClientConn>,
    partitioner: Arc<dyn Partitioner>,
    span: Span,

    state: ConnectivityState,
    picker: Arc<dyn Picker>,
    evaluator: ConnectivityStateEvaluator,
    sub_conns: BTreeMap<Address, Arc<dyn SubConn>>,
    sc_states: HashMap<SubConnId, ConnectivityState>,

    config: Option<BalancerConfig>,
    /// Absent until the first configuration arrives.
    ring: Option<Arc<HashRing<SubConnMember>>>,

    /// Last resolver error; cleared on the next resolution.
    resolver_err: Option<BalancerError>,
    /// Last connection error; cleared once the balancer is ready again.
    conn_err: Option<BalancerError>,
}

impl RingBalancer {
    /// Apply a new resolution result and, optionally, a new configuration.
    ///
    /// Returns [`BalancerError::NoHashring`] if no configuration has been
    /// seen yet and [`BalancerError::BadResolverState`] if the address list
    /// is empty; in both cases an error picker is published.
    pub fn update_client_conn_state(&mut self, state: ClientConnState) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();
        debug!(addresses = state.resolver_state.addresses.len(), "client conn state update");

        self.resolver_err = None;
        if let Some(config) = state.balancer_config {
            self.apply_config(config.with_defaults())?;
        }

        if self.ring.is_none() {
            self.picker = self.err_picker();
            self.publish();
            return Err(BalancerError::NoHashring);
        }

        let desired: BTreeSet<Address> = state.resolver_state.addresses.into_iter().collect();

        // Removals go first so a node that moved to a new address can
        // re-enter the ring under its old key.
        let stale: Vec<Address> = self
            .sub_conns
            .keys()
            .filter(|addr| !desired.contains(*addr))
            .cloned()
            .collect();
        let mut changed = !stale.is_empty();
        for addr in stale {
            self.remove_sub_conn(&addr)?;
        }

        for addr in &desired {
            if !self.sub_conns.contains_key(addr) {
                self.add_sub_conn(addr)?;
                changed = true;
            }
        }

        if changed {
            self.state = self.evaluator.current_state();
        }

        if let Some(ring) = &self.ring {
            debug!(members = ring.member_count(), vnodes = ring.vnode_count(), "hash ring updated");
            metrics::gauge!("balancer_ring_members").set(ring.member_count() as f64);
        }

        if desired.is_empty() {
            self.resolver_error(BalancerError::Resolver("produced zero addresses".to_string()));
            return Err(BalancerError::BadResolverState);
        }

        self.regenerate_picker();
        self.publish();
        Ok(())
    }

    /// Record a resolution failure.
    ///
    /// With no connection handles the balancer moves to `TransientFailure`.
    /// A new state is published only while in `TransientFailure`; otherwise
    /// the current picker keeps serving.
    pub fn resolver_error(&mut self, err: BalancerError) {
        let span = self.span.clone();
        let _guard = span.enter();
        warn!(error = %err, "resolver error");

        self.resolver_err = Some(err);
        if self.sub_conns.is_empty() {
            self.state = ConnectivityState::TransientFailure;
            self.picker = self.err_picker();
        }

        if self.state != ConnectivityState::TransientFailure {
            return;
        }
        self.publish();
    }

    /// Handle a connectivity change of one connection handle.
    ///
    /// Changes reported for handles the balancer no longer tracks are
    /// ignored.
    pub fn update_sub_conn_state(&mut self, sub_conn: &Arc<dyn SubConn>, state: SubConnState) {
        let span = self.span.clone();
        let _guard = span.enter();

        let id = sub_conn.id();
        let new = state.connectivity_state;
        let Some(&old) = self.sc_states.get(&id) else {
            debug!(sub_conn = %id, state = %new, "state change for unknown sub-connection");
            return;
        };
        debug!(sub_conn = %id, from = %old, to = %new, "sub-connection state change");

        // A failing handle stays failing until it reaches Ready.
        if old == ConnectivityState::TransientFailure
            && matches!(new, ConnectivityState::Connecting | ConnectivityState::Idle)
        {
            if new == ConnectivityState::Idle {
                sub_conn.connect();
            }
            return;
        }

        match new {
            ConnectivityState::Shutdown => {
                self.sc_states.remove(&id);
            }
            ConnectivityState::Idle => {
                self.sc_states.insert(id, new);
                sub_conn.connect();
            }
            ConnectivityState::TransientFailure => {
                self.sc_states.insert(id, new);
                self.conn_err = Some(
                    state
                        .connection_error
                        .unwrap_or_else(|| BalancerError::SubConn(format!("{id} failed"))),
                );
            }
            ConnectivityState::Connecting | ConnectivityState::Ready => {
                self.sc_states.insert(id, new);
            }
        }

        self.state = self.evaluator.record_transition(old, new);
        if self.state == ConnectivityState::Ready {
            self.conn_err = None;
        }

        self.regenerate_picker();
        self.publish();
    }

    /// Nothing to release; handles are owned by the transport.
    pub fn close(&mut self) {
        self.span.in_scope(|| debug!("balancer closed"));
    }

    /// Handles are connected eagerly, so there is no idle mode to leave.
    pub fn exit_idle(&mut self) {}

    /// Aggregate connectivity state.
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Last published picker.
    pub fn picker(&self) -> Arc<dyn Picker> {
        Arc::clone(&self.picker)
    }

    pub fn config(&self) -> Option<BalancerConfig> {
        self.config
    }

    /// Current ring snapshot, if a configuration has been applied.
    pub fn ring(&self) -> Option<Arc<HashRing<SubConnMember>>> {
        self.ring.clone()
    }

    /// Number of connection handles currently held.
    pub fn sub_conn_count(&self) -> usize {
        self.sub_conns.len()
    }

    /// Install `config`. A new replication factor rebuilds the ring with the
    /// same members; a spread change only affects the next picker.
    fn apply_config(&mut self, config: BalancerConfig) -> Result<()> {
        let rebuild = self
            .config
            .map_or(true, |current| current.replication_factor != config.replication_factor);

        if rebuild || self.ring.is_none() {
            let ring = match &self.ring {
                Some(ring) => ring.rebuild(config.replication_factor)?,
                None => HashRing::new(Arc::clone(&self.partitioner), config.replication_factor)?,
            };
            info!(
                replication_factor = config.replication_factor,
                members = ring.member_count(),
                "built hash ring"
            );
            self.ring = Some(Arc::new(ring));
        }

        self.config = Some(config);
        Ok(())
    }

    fn ring_mut(&mut self) -> Result<&mut HashRing<SubConnMember>> {
        self.ring
            .as_mut()
            .map(Arc::make_mut)
            .ok_or(BalancerError::NoHashring)
    }

    /// Create a handle for `addr`, put it on the ring and start connecting.
    ///
    /// A handle the transport fails to create is skipped. A handle the ring
    /// rejects is torn down and the error returned.
    fn add_sub_conn(&mut self, addr: &Address) -> Result<()> {
        let sub_conn = match self.cc.new_sub_conn(addr) {
            Ok(sub_conn) => sub_conn,
            Err(e) => {
                warn!(address = %addr, error = %e, "failed to create sub-connection");
                return Ok(());
            }
        };

        let added = self.ring_mut()?.add(SubConnMember::new(Arc::clone(&sub_conn)));
        if let Err(e) = added {
            warn!(address = %addr, error = %e, "hash ring rejected sub-connection");
            self.cc.remove_sub_conn(&sub_conn);
            let err = BalancerError::from(e);
            self.picker = Arc::new(ErrPicker::new(err.clone()));
            self.publish();
            return Err(err);
        }

        debug!(address = %addr, sub_conn = %sub_conn.id(), "added sub-connection");
        self.sc_states.insert(sub_conn.id(), ConnectivityState::Idle);
        self.evaluator
            .record_transition(ConnectivityState::Shutdown, ConnectivityState::Idle);
        self.sub_conns.insert(addr.clone(), Arc::clone(&sub_conn));
        sub_conn.connect();
        Ok(())
    }

    /// Take `addr` off the ring and tear its handle down.
    fn remove_sub_conn(&mut self, addr: &Address) -> Result<()> {
        let Some(sub_conn) = self.sub_conns.remove(addr) else {
            return Ok(());
        };

        if let Some(old) = self.sc_states.remove(&sub_conn.id()) {
            self.evaluator.record_transition(old, ConnectivityState::Shutdown);
        }
        self.cc.remove_sub_conn(&sub_conn);

        let removed = self.ring_mut()?.remove_key(&addr.ring_key());
        if let Err(e) = removed {
            warn!(address = %addr, error = %e, "sub-connection was not on the hash ring");
        }
        debug!(address = %addr, sub_conn = %sub_conn.id(), "removed sub-connection");
        Ok(())
    }

    fn err_picker(&self) -> Arc<dyn Picker> {
        Arc::new(ErrPicker::new(join_errors(
            self.conn_err.as_ref(),
            self.resolver_err.as_ref(),
        )))
    }

    /// Picker matching the aggregate state.
    fn regenerate_picker(&mut self) {
        self.picker = match &self.ring {
            Some(ring) if self.state != ConnectivityState::TransientFailure => {
                let spread = self.config.map_or(DEFAULT_SPREAD, |c| c.spread);
                Arc::new(RingPicker::new(Arc::clone(ring), spread))
            }
            _ => self.err_picker(),
        };
    }

    fn publish(&self) {
        metrics::counter!("balancer_updates_total").increment(1);
        self.cc.update_state(BalancerState {
            connectivity_state: self.state,
            picker: Arc::clone(&self.picker),
        });
    }
}
