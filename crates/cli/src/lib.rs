//! Command line front end for the consistent-hash balancer.
//!
//! Provides commands for:
//! - Printing the service config that selects the `consistent-hashring` policy
//! - Routing keys over a node list through discovery and the ring balancer

pub mod commands;
pub mod config;
pub mod sim;

pub use commands::{Command, CommandResult, PolicyArgs, RouteArgs, ServiceConfigArgs};
pub use config::CliConfig;
pub use sim::{BalancedChannel, SimClientConn};
