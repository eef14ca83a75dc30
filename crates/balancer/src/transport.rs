//! Seams to the transport runtime that owns the actual connections.

use std::fmt;
use std::sync::Arc;

use corelib::{Address, ResolverState};

use crate::config::BalancerConfig;
use crate::connectivity::ConnectivityState;
use crate::error::{BalancerError, Result};
use crate::picker::Picker;

/// Identity of a connection handle, unique within one [`ClientConn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubConnId(pub u64);

impl fmt::Display for SubConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subconn-{}", self.0)
    }
}

/// One outbound connection managed by the transport.
pub trait SubConn: Send + Sync + fmt::Debug + 'static {
    fn id(&self) -> SubConnId;

    /// Address the handle dials.
    fn address(&self) -> &Address;

    /// Start connecting if idle. Progress is reported back through
    /// [`RingBalancer::update_sub_conn_state`](crate::RingBalancer::update_sub_conn_state).
    fn connect(&self);
}

/// State change reported for one connection handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubConnState {
    pub connectivity_state: ConnectivityState,
    /// Set when `connectivity_state` is `TransientFailure`.
    pub connection_error: Option<BalancerError>,
}

impl SubConnState {
    pub fn new(connectivity_state: ConnectivityState) -> Self {
        Self {
            connectivity_state,
            connection_error: None,
        }
    }

    /// `TransientFailure` caused by `error`.
    pub fn failed(error: BalancerError) -> Self {
        Self {
            connectivity_state: ConnectivityState::TransientFailure,
            connection_error: Some(error),
        }
    }
}

/// What the balancer publishes after every decision.
#[derive(Clone)]
pub struct BalancerState {
    pub connectivity_state: ConnectivityState,
    pub picker: Arc<dyn Picker>,
}

impl fmt::Debug for BalancerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalancerState")
            .field("connectivity_state", &self.connectivity_state)
            .finish_non_exhaustive()
    }
}

/// Input to [`RingBalancer::update_client_conn_state`](crate::RingBalancer::update_client_conn_state).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConnState {
    pub resolver_state: ResolverState,
    /// Parsed policy config, if the service config carries one.
    pub balancer_config: Option<BalancerConfig>,
}

impl ClientConnState {
    pub fn new(resolver_state: ResolverState, balancer_config: Option<BalancerConfig>) -> Self {
        Self {
            resolver_state,
            balancer_config,
        }
    }
}

/// The transport runtime as seen by the balancer.
pub trait ClientConn: Send + Sync + 'static {
    /// Create a handle for `address`. The handle starts idle.
    fn new_sub_conn(&self, address: &Address) -> Result<Arc<dyn SubConn>>;

    /// Tear a handle down. Called at most once per handle.
    fn remove_sub_conn(&self, sub_conn: &Arc<dyn SubConn>);

    /// Install a new aggregate state and picker.
    fn update_state(&self, state: BalancerState);
}
