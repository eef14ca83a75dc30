//! Consistent-hash ring load balancing.
//!
//! This crate provides the client-side half of key-affine routing:
//! - The `consistent-hashring` policy configuration and its service-config JSON
//! - [`RingBalancer`], which keeps one connection handle per resolved address
//!   and places each on a hash ring
//! - Pickers that route a call by its balance key
//!
//! The transport runtime is abstracted behind [`ClientConn`] and [`SubConn`],
//! so the balancer can sit on top of any connection layer.

pub mod config;
pub mod connectivity;
mod error;
pub mod member;
pub mod picker;
pub mod ring_balancer;
pub mod transport;

pub use config::{BalancerConfig, BALANCER_NAME, DEFAULT_SERVICE_CONFIG_JSON, DEFAULT_SPREAD};
pub use connectivity::{ConnectivityState, ConnectivityStateEvaluator};
pub use error::{BalancerError, Result};
pub use member::SubConnMember;
pub use picker::{CallContext, ErrPicker, PickInfo, PickResult, Picker, RingPicker};
pub use ring_balancer::{Builder, RingBalancer};
pub use transport::{BalancerState, ClientConn, ClientConnState, SubConn, SubConnId, SubConnState};
