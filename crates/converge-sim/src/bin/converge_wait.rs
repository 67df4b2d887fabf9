//! converge-wait
//!
//! Blocks until every listed node reports stable OSPFv3 adjacencies, or
//! fails once the timeout passes. Nodes are existing network namespaces
//! running ospf6d with a vtysh socket.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use converge_core::config::ConvergenceConfigInput;
use converge_core::{ConvergenceCheck, ConvergenceConfig, ConvergenceError};
use converge_sim::source::VtyshNeighborSource;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Wait for OSPFv3 convergence across emulated nodes.
#[derive(Parser, Debug)]
#[command(name = "converge-wait", about = "Wait for OSPFv3 convergence")]
struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node (namespace) to check. Repeatable.
    #[arg(long = "node")]
    nodes: Vec<String>,

    /// Seconds every adjacency must have held its state.
    #[arg(long)]
    stable_secs: Option<u64>,

    /// Poll interval in milliseconds.
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Minimum number of neighbors per node.
    #[arg(long)]
    min_peers: Option<usize>,

    /// Overall timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ConvergenceConfig> {
        let text = match &self.config {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => String::new(),
        };
        let mut input = ConvergenceConfigInput::parse(&text).map_err(anyhow::Error::msg)?;

        if !self.nodes.is_empty() {
            input.nodes = self.nodes.clone();
        }
        input.stable_duration_secs = self.stable_secs.or(input.stable_duration_secs);
        input.poll_interval_ms = self.poll_ms.or(input.poll_interval_ms);
        input.min_peers = self.min_peers.or(input.min_peers);
        input.timeout_secs = self.timeout_secs.or(input.timeout_secs);

        input.resolve().map_err(anyhow::Error::msg)
    }
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    if config.nodes.is_empty() {
        anyhow::bail!("no nodes given; use --node or list them in the config file");
    }

    info!(
        nodes = ?config.nodes,
        min_peers = config.criteria.min_peers,
        stable = ?config.criteria.stable_duration,
        poll = ?config.poll_interval,
        timeout = ?config.timeout,
        "waiting for OSPFv3 convergence"
    );

    let source = Arc::new(VtyshNeighborSource::attach(&config.nodes));
    let check = ConvergenceCheck::from_config(&config);
    match check.wait(source, config.timeout) {
        Ok(report) => {
            println!(
                "converged: {} nodes in {:.1}s",
                report.nodes,
                report.elapsed.as_secs_f64()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(ConvergenceError::NotConverged { pending, timeout }) => {
            error!("not converged after {:?}: {}", timeout, pending.join(", "));
            Ok(ExitCode::from(2))
        }
        Err(err) => Err(anyhow::Error::new(err).context("convergence check failed")),
    }
}
