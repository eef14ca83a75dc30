//! Dynamic service discovery feeding the consistent-hash balancer.
//!
//! This crate provides:
//! - [`NodeRegistry`] / [`Register`]: the narrow interfaces to an external
//!   node registry (query, watch, and the producer side)
//! - [`MemoryRegistry`]: an in-process registry with keep-alive leases
//! - [`Resolver`]: watches a service, keeps an authoritative node cache
//!   reconciled by periodic full resyncs, and pushes every change downstream
//! - [`Target`]: `svc:///<service>` target naming

pub mod cache;
mod error;
pub mod memory;
pub mod registry;
pub mod resolver;
pub mod scheme;
mod supervisor;

pub use cache::NodeCache;
pub use error::{DiscoveryError, Result};
pub use memory::MemoryRegistry;
pub use registry::{NodeRegistry, NodeWatcher, Register};
pub use resolver::{Resolver, ResolverBuilder, ResolverClientConn, DEFAULT_RESYNC_INTERVAL};
pub use scheme::{target_uri, Target, SCHEME_NAME};
