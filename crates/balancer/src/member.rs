//! Connection handles as ring members.

use std::sync::Arc;

use corelib::Member;

use crate::transport::SubConn;

/// A connection handle placed on the ring under a stable key.
///
/// The key is the node identity when the address carries one, so a node
/// keeps its ring position across address changes.
#[derive(Debug, Clone)]
pub struct SubConnMember {
    sub_conn: Arc<dyn SubConn>,
    key: String,
}

impl SubConnMember {
    /// Member for `sub_conn`, keyed by its address.
    pub fn new(sub_conn: Arc<dyn SubConn>) -> Self {
        let key = sub_conn.address().ring_key();
        Self { sub_conn, key }
    }

    pub fn sub_conn(&self) -> &Arc<dyn SubConn> {
        &self.sub_conn
    }

    pub fn into_sub_conn(self) -> Arc<dyn SubConn> {
        self.sub_conn
    }
}

impl Member for SubConnMember {
    fn key(&self) -> &str {
        &self.key
    }
}
