//! # OSPFv3 Convergence
//!
//! A node has converged when it reports at least `min_peers` neighbors, none
//! of them on an interface still in the `Waiting` state, and every one of
//! them has held its state for at least `stable_duration`. That can only be
//! found out by asking the node, so [`ConvergenceCheck`] builds one
//! [`PollingCondition`] per node on a shared [`ConditionBarrier`] and
//! [`Scheduler`], then waits.
//!
//! Neighbor tables come from a [`NeighborSource`]; running the routing
//! daemon's CLI inside an emulated node is the caller's business.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use quanta::Instant;
use thiserror::Error;
use tracing::{error, info};

use crate::barrier::{BarrierError, ConditionBarrier, WaitOutcome};
use crate::config::ConvergenceConfig;
use crate::polling::{PollingCondition, Sampler};
use crate::scheduler::{Scheduler, SchedulerError};

// ── Peer records ────────────────────────────────────────────────────

/// OSPFv3 interface state, as printed in the neighbor table's `I/F[State]`
/// column. The same names are used for the neighbor's role on the link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InterfaceState {
    Down,
    Loopback,
    /// Still deciding on a designated router.
    Waiting,
    PointToPoint,
    DrOther,
    Backup,
    Designated,
    Other(String),
}

impl InterfaceState {
    /// Whether the interface is still negotiating and its adjacencies may change.
    pub fn is_transient(&self) -> bool {
        matches!(self, InterfaceState::Waiting)
    }
}

impl From<&str> for InterfaceState {
    fn from(s: &str) -> Self {
        match s {
            "Down" => InterfaceState::Down,
            "Loopback" => InterfaceState::Loopback,
            "Waiting" => InterfaceState::Waiting,
            "PointToPoint" => InterfaceState::PointToPoint,
            "DROther" => InterfaceState::DrOther,
            "BDR" => InterfaceState::Backup,
            "DR" => InterfaceState::Designated,
            other => InterfaceState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterfaceState::Down => "Down",
            InterfaceState::Loopback => "Loopback",
            InterfaceState::Waiting => "Waiting",
            InterfaceState::PointToPoint => "PointToPoint",
            InterfaceState::DrOther => "DROther",
            InterfaceState::Backup => "BDR",
            InterfaceState::Designated => "DR",
            InterfaceState::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// OSPFv3 neighbor adjacency state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NeighborState {
    Down,
    Attempt,
    Init,
    TwoWay,
    ExStart,
    Exchange,
    Loading,
    Full,
    Other(String),
}

impl From<&str> for NeighborState {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "down" => NeighborState::Down,
            "attempt" => NeighborState::Attempt,
            "init" => NeighborState::Init,
            "twoway" => NeighborState::TwoWay,
            "exstart" => NeighborState::ExStart,
            "exchange" => NeighborState::Exchange,
            "loading" => NeighborState::Loading,
            "full" => NeighborState::Full,
            _ => NeighborState::Other(s.to_string()),
        }
    }
}

/// One row of a node's neighbor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub router_id: String,
    pub priority: u8,
    pub dead_time: Duration,
    pub state: NeighborState,
    /// The neighbor's role on the link (DR, BDR, DROther, PointToPoint).
    pub role: InterfaceState,
    /// How long the neighbor has been in `state`.
    pub duration: Duration,
    pub interface: String,
    pub interface_state: InterfaceState,
}

impl PeerRecord {
    pub fn in_state(&self, states: &[NeighborState]) -> bool {
        states.contains(&self.state)
    }
}

/// Supplies the current neighbor table of a node.
pub trait NeighborSource: Send + Sync + 'static {
    fn neighbors(&self, node: &str) -> anyhow::Result<Vec<PeerRecord>>;
}

// ── Stability predicate ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityCriteria {
    pub min_peers: usize,
    pub stable_duration: Duration,
}

impl Default for StabilityCriteria {
    fn default() -> Self {
        Self {
            min_peers: 1,
            stable_duration: Duration::from_secs(10),
        }
    }
}

impl StabilityCriteria {
    pub fn is_stable(&self, peers: &[PeerRecord]) -> bool {
        peers.len() >= self.min_peers
            && peers.iter().all(|peer| {
                !peer.interface_state.is_transient() && peer.duration >= self.stable_duration
            })
    }
}

/// Samples one node's neighbor table against a [`StabilityCriteria`].
pub struct StabilityProbe {
    source: Arc<dyn NeighborSource>,
    node: String,
    criteria: StabilityCriteria,
}

impl StabilityProbe {
    pub fn new(
        source: Arc<dyn NeighborSource>,
        node: impl Into<String>,
        criteria: StabilityCriteria,
    ) -> Self {
        Self {
            source,
            node: node.into(),
            criteria,
        }
    }
}

impl Sampler for StabilityProbe {
    fn sample(&self) -> anyhow::Result<bool> {
        let peers = self
            .source
            .neighbors(&self.node)
            .with_context(|| format!("querying OSPFv3 neighbors of {}", self.node))?;
        Ok(self.criteria.is_stable(&peers))
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("OSPFv3 failed to converge within {timeout:?}; still waiting on {pending:?}")]
    NotConverged {
        pending: Vec<String>,
        timeout: Duration,
    },
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("scheduler thread panicked")]
    SchedulerPanicked,
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub nodes: usize,
    pub elapsed: Duration,
}

/// Waits for a set of nodes to reach stable OSPFv3 adjacencies.
#[derive(Debug, Clone)]
pub struct ConvergenceCheck {
    nodes: Vec<String>,
    criteria: StabilityCriteria,
    poll_interval: Duration,
}

impl ConvergenceCheck {
    pub fn new(nodes: Vec<String>, criteria: StabilityCriteria, poll_interval: Duration) -> Self {
        Self {
            nodes,
            criteria,
            poll_interval,
        }
    }

    pub fn from_config(config: &ConvergenceConfig) -> Self {
        Self::new(config.nodes.clone(), config.criteria, config.poll_interval)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Polls every node until all are stable or `timeout` passes.
    ///
    /// The scheduler runs on its own thread while this thread blocks on the
    /// barrier, and is stopped before returning whatever the outcome. Stopping
    /// drops the queued polls, so `source` is released on return.
    pub fn wait(
        &self,
        source: Arc<dyn NeighborSource>,
        timeout: Duration,
    ) -> Result<ConvergenceReport, ConvergenceError> {
        let started = Instant::now();
        let scheduler = Scheduler::new();
        let barrier = Arc::new(ConditionBarrier::new());
        {
            let scheduler = scheduler.clone();
            barrier.set_timeout_handler(move || {
                scheduler.stop();
                error!("OSPFv3 failed to converge within {:?}", timeout);
                anyhow::bail!("OSPFv3 failed to converge within {:?}", timeout)
            });
        }

        for node in &self.nodes {
            let probe = StabilityProbe::new(Arc::clone(&source), node.clone(), self.criteria);
            if let Err(err) =
                PollingCondition::start(node.clone(), probe, self.poll_interval, &barrier, &scheduler)
            {
                scheduler.stop();
                return Err(err.into());
            }
        }

        let spawned = {
            let scheduler = scheduler.clone();
            let barrier = Arc::clone(&barrier);
            thread::Builder::new()
                .name("converge-scheduler".into())
                .spawn(move || {
                    let result = scheduler.run();
                    if let Err(err) = &result {
                        barrier.abort(err.to_string());
                    }
                    result
                })
        };
        let worker = match spawned {
            Ok(worker) => worker,
            Err(err) => {
                scheduler.stop();
                return Err(ConvergenceError::Spawn(err));
            }
        };

        let outcome = barrier.wait(Some(timeout));
        scheduler.stop();
        let run_result = worker
            .join()
            .map_err(|_| ConvergenceError::SchedulerPanicked)?;

        match outcome {
            Ok(WaitOutcome::Satisfied) => {
                run_result?;
                let report = ConvergenceReport {
                    nodes: self.nodes.len(),
                    elapsed: started.elapsed(),
                };
                info!(
                    "OSPFv3 converged on {} nodes in {:?}",
                    report.nodes, report.elapsed
                );
                Ok(report)
            }
            Ok(WaitOutcome::TimedOut) | Err(BarrierError::TimeoutHandler(_)) => {
                Err(ConvergenceError::NotConverged {
                    pending: barrier.pending_names(),
                    timeout,
                })
            }
            Err(BarrierError::Aborted(reason)) => Err(match run_result {
                Err(err) => ConvergenceError::Scheduler(err),
                Ok(()) => ConvergenceError::Barrier(BarrierError::Aborted(reason)),
            }),
            Err(err) => Err(err.into()),
        }
    }
}
