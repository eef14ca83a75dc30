//! Resolved addresses handed from discovery to the balancer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One resolved endpoint.
///
/// Two addresses refer to the same endpoint only when every field matches;
/// a node that keeps its `host:port` but changes identity is a different
/// endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    /// `host:port` to dial.
    pub addr: String,
    /// Authority override; usually empty.
    #[serde(default)]
    pub server_name: String,
    /// Identity of the node behind the address, if known.
    #[serde(default)]
    pub id: Option<String>,
}

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            server_name: String::new(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Key under which the address is placed on the hash ring.
    ///
    /// The node identity when one is present, otherwise `server_name + addr`.
    pub fn ring_key(&self) -> String {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("{}{}", self.server_name, self.addr),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} ({})", self.addr, id),
            None => f.write_str(&self.addr),
        }
    }
}

/// Full endpoint set produced by one resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolverState {
    pub addresses: Vec<Address>,
}

impl ResolverState {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self { addresses }
    }
}
