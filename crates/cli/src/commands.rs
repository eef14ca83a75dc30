//! Subcommands.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use balancer::{BalancerConfig, Builder, ConnectivityState, DEFAULT_SPREAD};
use clap::{Args, Subcommand};
use corelib::{Node, DEFAULT_REPLICATION_FACTOR};
use discovery::{MemoryRegistry, Register, ResolverBuilder, Target};
use tracing::{info, info_span};

use crate::sim::BalancedChannel;

/// How long `route` waits for the balancer to come up.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the service config selecting the consistent-hashring policy.
    ServiceConfig(ServiceConfigArgs),
    /// Route keys over the nodes of a service read from a JSON file.
    Route(RouteArgs),
}

/// Ring policy settings.
#[derive(Debug, Clone, Args)]
pub struct PolicyArgs {
    /// Virtual nodes per ring member.
    #[arg(long, default_value_t = DEFAULT_REPLICATION_FACTOR)]
    pub replication_factor: u16,

    /// Number of nearest owners each key is spread over.
    #[arg(long, default_value_t = DEFAULT_SPREAD)]
    pub spread: u8,
}

impl PolicyArgs {
    pub fn config(&self) -> BalancerConfig {
        BalancerConfig::new(self.replication_factor, self.spread)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServiceConfigArgs {
    #[command(flatten)]
    pub policy: PolicyArgs,
}

#[derive(Debug, Clone, Args)]
pub struct RouteArgs {
    /// JSON array of nodes (`id`, `name`, `host`, `port`, `type`, `tags`).
    #[arg(long)]
    pub nodes: PathBuf,

    /// Service whose nodes are routed over.
    #[arg(long)]
    pub service: String,

    /// Only use nodes carrying this tag. May be repeated.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Routing key. May be repeated.
    #[arg(long = "key", required = true)]
    pub keys: Vec<String>,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Lines printed by a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub lines: Vec<String>,
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

impl Command {
    pub async fn execute(self) -> Result<CommandResult> {
        match self {
            Command::ServiceConfig(args) => service_config(&args),
            Command::Route(args) => route(&args).await,
        }
    }
}

fn service_config(args: &ServiceConfigArgs) -> Result<CommandResult> {
    let json = args.policy.config().service_config_json()?;
    Ok(CommandResult { lines: vec![json] })
}

/// Load nodes from `path`.
pub fn load_nodes(path: &std::path::Path) -> Result<Vec<Node>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing nodes from {}", path.display()))
}

async fn route(args: &RouteArgs) -> Result<CommandResult> {
    let span = info_span!("route", service = %args.service);

    let registry = Arc::new(MemoryRegistry::new());
    for node in load_nodes(&args.nodes)? {
        registry.register(&node).await?;
    }

    let channel = Arc::new(BalancedChannel::new(
        &Builder::default().with_span(span.clone()),
        args.policy.config(),
    ));
    let resolver = ResolverBuilder::new(registry)
        .with_span(span.clone())
        .with_tags(args.tags.iter().cloned())
        .build(&Target::for_service(args.service.clone()), channel.clone())
        .await
        .with_context(|| format!("resolving {}", args.service))?;

    let settled = tokio::time::timeout(SETTLE_TIMEOUT, channel.settled())
        .await
        .context("timed out waiting for the balancer")?;
    if settled != Some(ConnectivityState::Ready) {
        resolver.shutdown().await;
        bail!("no usable nodes for service {}", args.service);
    }
    span.in_scope(|| info!(nodes = resolver.nodes().len(), "balancer ready"));

    let method = format!("/{}/route", args.service);
    let mut lines = Vec::with_capacity(args.keys.len());
    for key in &args.keys {
        let address = channel
            .pick(&method, key)
            .with_context(|| format!("routing key {key}"))?;
        lines.push(format!(
            "{key}\t{}\t{}",
            address.addr,
            address.id.as_deref().unwrap_or("-")
        ));
    }

    resolver.shutdown().await;
    Ok(CommandResult { lines })
}

#[cfg(test)]
mod tests {
    use super::*;
    use balancer::DEFAULT_SERVICE_CONFIG_JSON;

    #[tokio::test]
    async fn test_service_config_defaults() {
        let result = Command::ServiceConfig(ServiceConfigArgs {
            policy: PolicyArgs {
                replication_factor: DEFAULT_REPLICATION_FACTOR,
                spread: DEFAULT_SPREAD,
            },
        })
        .execute()
        .await
        .unwrap();

        assert_eq!(result.lines, vec![DEFAULT_SERVICE_CONFIG_JSON.to_string()]);
        assert_eq!(result.to_string(), format!("{DEFAULT_SERVICE_CONFIG_JSON}\n"));
    }

    #[test]
    fn test_zero_policy_args_fall_back_to_defaults() {
        let policy = PolicyArgs {
            replication_factor: 0,
            spread: 0,
        };
        assert_eq!(policy.config(), BalancerConfig::default());
    }

    #[test]
    fn test_load_nodes_missing_file() {
        let err = load_nodes(std::path::Path::new("/nonexistent/nodes.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/nodes.json"));
    }
}
