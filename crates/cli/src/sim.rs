//! Discovery-fed balancing over a simulated transport.
//!
//! [`BalancedChannel`] sits between a [`Resolver`](discovery::Resolver) and a
//! [`RingBalancer`]: resolved endpoints become balancer updates, and the
//! balancer's pickers route calls. The transport is simulated by
//! [`SimClientConn`], whose connections become ready as soon as the
//! balancer asks them to connect.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use balancer::{
    BalancerConfig, BalancerError, BalancerState, Builder, CallContext, ClientConn, ClientConnState,
    ConnectivityState, PickInfo, RingBalancer, SubConn, SubConnId, SubConnState,
};
use corelib::{Address, ResolverState};
use discovery::{DiscoveryError, ResolverClientConn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

type ConnectQueue = Arc<Mutex<VecDeque<SubConnId>>>;

/// Connection handle of the simulated transport.
pub struct SimSubConn {
    id: SubConnId,
    address: Address,
    connects: ConnectQueue,
}

impl fmt::Debug for SimSubConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimSubConn")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish()
    }
}

impl SubConn for SimSubConn {
    fn id(&self) -> SubConnId {
        self.id
    }

    fn address(&self) -> &Address {
        &self.address
    }

    fn connect(&self) {
        self.connects.lock().push_back(self.id);
    }
}

/// Transport whose connections succeed instantly.
///
/// Connect requests are queued rather than answered inline: the balancer is
/// still mid-callback when it calls `connect`, and state changes must be
/// delivered one callback at a time.
pub struct SimClientConn {
    next_id: AtomicU64,
    connects: ConnectQueue,
    live: Mutex<HashMap<SubConnId, Arc<dyn SubConn>>>,
    state: watch::Sender<Option<BalancerState>>,
}

impl SimClientConn {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            connects: Arc::new(Mutex::new(VecDeque::new())),
            live: Mutex::new(HashMap::new()),
            state: watch::Sender::new(None),
        }
    }

    /// Latest published balancer state.
    pub fn subscribe(&self) -> watch::Receiver<Option<BalancerState>> {
        self.state.subscribe()
    }

    /// Number of connection handles not yet torn down.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    fn next_connect(&self) -> Option<Arc<dyn SubConn>> {
        loop {
            let id = self.connects.lock().pop_front()?;
            if let Some(sc) = self.live.lock().get(&id) {
                return Some(Arc::clone(sc));
            }
        }
    }
}

impl Default for SimClientConn {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConn for SimClientConn {
    fn new_sub_conn(&self, address: &Address) -> balancer::Result<Arc<dyn SubConn>> {
        let sc: Arc<dyn SubConn> = Arc::new(SimSubConn {
            id: SubConnId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            address: address.clone(),
            connects: Arc::clone(&self.connects),
        });
        self.live.lock().insert(sc.id(), Arc::clone(&sc));
        debug!(sub_conn = %sc.id(), address = %address, "sub-connection created");
        Ok(sc)
    }

    fn remove_sub_conn(&self, sub_conn: &Arc<dyn SubConn>) {
        self.live.lock().remove(&sub_conn.id());
        debug!(sub_conn = %sub_conn.id(), "sub-connection removed");
    }

    fn update_state(&self, state: BalancerState) {
        self.state.send_replace(Some(state));
    }
}

/// A ring balancer fed by discovery.
///
/// Implements [`ResolverClientConn`] so it can be handed straight to
/// [`ResolverBuilder::build`](discovery::ResolverBuilder::build).
pub struct BalancedChannel {
    balancer: Mutex<RingBalancer>,
    transport: Arc<SimClientConn>,
    config: BalancerConfig,
}

impl BalancedChannel {
    pub fn new(builder: &Builder, config: BalancerConfig) -> Self {
        let transport = Arc::new(SimClientConn::new());
        let balancer = builder.build(Arc::clone(&transport) as Arc<dyn ClientConn>);
        Self {
            balancer: Mutex::new(balancer),
            transport,
            config,
        }
    }

    pub fn transport(&self) -> &Arc<SimClientConn> {
        &self.transport
    }

    /// Wait until the balancer has published a state that is not merely
    /// getting started.
    pub async fn settled(&self) -> Option<ConnectivityState> {
        let mut rx = self.transport.subscribe();
        let state = rx
            .wait_for(|state| {
                matches!(
                    state.as_ref().map(|s| s.connectivity_state),
                    Some(ConnectivityState::Ready | ConnectivityState::TransientFailure)
                )
            })
            .await
            .ok()?;
        state.as_ref().map(|s| s.connectivity_state)
    }

    /// Route one call by `key` with the current picker.
    pub fn pick(&self, method: &str, key: &str) -> balancer::Result<Address> {
        let picker = self
            .transport
            .subscribe()
            .borrow()
            .as_ref()
            .map(|state| Arc::clone(&state.picker))
            .ok_or(BalancerError::NoSubConnAvailable)?;

        let info = PickInfo::new(method, CallContext::new().with_balance_key(key.to_string()));
        Ok(picker.pick(&info)?.sub_conn.address().clone())
    }

    /// Deliver queued connection progress to the balancer.
    fn settle(&self, balancer: &mut RingBalancer) {
        while let Some(sc) = self.transport.next_connect() {
            balancer.update_sub_conn_state(&sc, SubConnState::new(ConnectivityState::Connecting));
            balancer.update_sub_conn_state(&sc, SubConnState::new(ConnectivityState::Ready));
        }
    }
}

impl ResolverClientConn for BalancedChannel {
    fn update_state(&self, state: ResolverState) -> discovery::Result<()> {
        let mut balancer = self.balancer.lock();
        let result = balancer.update_client_conn_state(ClientConnState::new(state, Some(self.config)));
        self.settle(&mut balancer);
        result.map_err(|e| DiscoveryError::Rejected(e.to_string()))
    }

    fn report_error(&self, error: DiscoveryError) {
        let mut balancer = self.balancer.lock();
        balancer.resolver_error(BalancerError::Resolver(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connects_become_ready() {
        let channel = BalancedChannel::new(&Builder::default(), BalancerConfig::default());
        let addresses = vec![
            Address::new("10.0.0.1:9000").with_id("a"),
            Address::new("10.0.0.2:9000").with_id("b"),
        ];

        channel.update_state(ResolverState::new(addresses)).unwrap();

        let rx = channel.transport().subscribe();
        let state = rx.borrow().clone().unwrap();
        assert_eq!(state.connectivity_state, ConnectivityState::Ready);
        assert_eq!(channel.transport().live_count(), 2);

        let first = channel.pick("/orders/Get", "user-42").unwrap();
        assert_eq!(channel.pick("/orders/Get", "user-42").unwrap(), first);
    }

    #[test]
    fn test_empty_resolution_is_rejected() {
        let channel = BalancedChannel::new(&Builder::default(), BalancerConfig::default());

        let err = channel.update_state(ResolverState::default()).unwrap_err();

        assert!(matches!(err, DiscoveryError::Rejected(_)));
        assert!(channel.pick("/orders/Get", "user-42").is_err());
    }

    #[test]
    fn test_removed_sub_conn_is_not_connected() {
        let channel = BalancedChannel::new(&Builder::default(), BalancerConfig::default());
        channel
            .update_state(ResolverState::new(vec![Address::new("10.0.0.1:9000").with_id("a")]))
            .unwrap();
        channel
            .update_state(ResolverState::new(vec![Address::new("10.0.0.2:9000").with_id("b")]))
            .unwrap();

        assert_eq!(channel.transport().live_count(), 1);
        assert_eq!(
            channel.pick("/orders/Get", "anything").unwrap().id.as_deref(),
            Some("b")
        );
    }
}
