//! Core library for the consistent-hash load balancer.
//!
//! This crate provides the pieces every other crate in the workspace builds on:
//! - Token and partitioner (hash function) abstractions
//! - Virtual nodes and the member-keyed hash ring
//! - The discoverable node model and the addresses handed to the balancer

pub mod address;
pub mod error;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod vnode;

pub use address::{Address, ResolverState};
pub use error::{Error, Result};
pub use node::{Node, NodeEvent, NodeEventKind, NodeType};
pub use partitioner::Partitioner;
pub use ring::{HashRing, Member, DEFAULT_REPLICATION_FACTOR};
pub use token::Token;
pub use vnode::VirtualNode;
