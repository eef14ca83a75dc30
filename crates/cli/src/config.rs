//! Top-level command line options.

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

/// Consistent-hash client-side load balancing toolkit.
#[derive(Debug, Parser)]
#[command(name = "ringlb", version, about)]
pub struct CliConfig {
    /// Log filter directive, e.g. `debug` or `balancer=trace`.
    /// Overrides `RUST_LOG`; without either, `info` is used.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Filter selected by `--log-level`, then `RUST_LOG`, then `info`.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match &self.log_level {
            Some(level) => EnvFilter::try_new(level).map_err(|e| anyhow!("invalid --log-level {level}: {e}")),
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
        }
    }

    /// Install the global fmt subscriber. Logs go to stderr so command
    /// output on stdout stays machine readable.
    pub fn init_tracing(&self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(self.env_filter()?)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
    }

    /// Execute the selected command and print its output.
    pub async fn run(self) -> Result<()> {
        let result = self.command.execute().await?;
        print!("{result}");
        Ok(())
    }
}
