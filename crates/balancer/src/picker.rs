//! Per-call routing.
//!
//! A picker is an immutable snapshot built by the balancer after each state
//! change. Picking takes no locks: [`RingPicker`] holds its own reference to
//! the ring as it was when the picker was built.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use corelib::{HashRing, Member};
use rand::Rng;
use tracing::debug;

use crate::error::{BalancerError, Result};
use crate::member::SubConnMember;
use crate::transport::SubConn;

/// Length of the random key used for calls that carry none.
const RANDOM_KEY_LEN: usize = 10;

/// Per-call values the picker may consult.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    balance_key: Option<Bytes>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route the call by `key`: calls with equal keys go to the same
    /// backend while membership is unchanged.
    pub fn with_balance_key(mut self, key: impl Into<Bytes>) -> Self {
        self.balance_key = Some(key.into());
        self
    }

    pub fn balance_key(&self) -> Option<&Bytes> {
        self.balance_key.as_ref()
    }
}

/// Information about the call being routed.
#[derive(Debug, Clone, Default)]
pub struct PickInfo {
    pub full_method_name: String,
    pub ctx: CallContext,
}

impl PickInfo {
    pub fn new(full_method_name: impl Into<String>, ctx: CallContext) -> Self {
        Self {
            full_method_name: full_method_name.into(),
            ctx,
        }
    }
}

/// The connection handle chosen for a call.
#[derive(Debug, Clone)]
pub struct PickResult {
    pub sub_conn: Arc<dyn SubConn>,
}

/// Chooses a connection handle for each call.
pub trait Picker: Send + Sync + 'static {
    fn pick(&self, info: &PickInfo) -> Result<PickResult>;
}

/// Routes calls over a snapshot of the hash ring.
#[derive(Clone)]
pub struct RingPicker {
    ring: Arc<HashRing<SubConnMember>>,
    spread: u8,
}

impl RingPicker {
    pub fn new(ring: Arc<HashRing<SubConnMember>>, spread: u8) -> Self {
        Self { ring, spread }
    }

    pub fn spread(&self) -> u8 {
        self.spread
    }
}

impl fmt::Debug for RingPicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingPicker")
            .field("members", &self.ring.member_count())
            .field("spread", &self.spread)
            .finish()
    }
}

impl Picker for RingPicker {
    fn pick(&self, info: &PickInfo) -> Result<PickResult> {
        let key = match info.ctx.balance_key() {
            Some(key) if !key.is_empty() => key.clone(),
            _ => random_key(),
        };

        let owners = self.ring.find_n(&key, usize::from(self.spread)).map_err(|e| {
            metrics::counter!("balancer_pick_failures_total").increment(1);
            BalancerError::Unavailable(e.to_string())
        })?;

        let index = if self.spread > 1 && owners.len() > 1 {
            rand::thread_rng().gen_range(0..owners.len())
        } else {
            0
        };
        let chosen = owners
            .into_iter()
            .nth(index)
            .ok_or(BalancerError::NoSubConnAvailable)?;

        debug!(method = %info.full_method_name, member = chosen.key(), "picked");
        metrics::counter!("balancer_picks_total").increment(1);
        Ok(PickResult {
            sub_conn: chosen.into_sub_conn(),
        })
    }
}

fn random_key() -> Bytes {
    let mut key = [0u8; RANDOM_KEY_LEN];
    rand::thread_rng().fill(&mut key[..]);
    Bytes::copy_from_slice(&key)
}

/// Fails every call with a fixed error.
#[derive(Debug, Clone)]
pub struct ErrPicker {
    err: BalancerError,
}

impl ErrPicker {
    pub fn new(err: BalancerError) -> Self {
        Self { err }
    }

    pub fn error(&self) -> &BalancerError {
        &self.err
    }
}

impl Picker for ErrPicker {
    fn pick(&self, _: &PickInfo) -> Result<PickResult> {
        metrics::counter!("balancer_pick_failures_total").increment(1);
        Err(self.err.clone())
    }
}
