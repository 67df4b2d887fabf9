//! Waiting for routing convergence.
//!
//! This crate contains:
//! - **Conditions**: side-effect-free predicates with a stable identity
//! - **Condition barrier**: blocks until every registered condition holds, or a deadline passes
//! - **Scheduler**: single-threaded runner of delayed callbacks
//! - **Polling conditions**: sampled predicates re-evaluated on the scheduler until true
//! - **Convergence check**: one polling condition per node, reported as pass/fail

pub mod barrier;
pub mod condition;
pub mod config;
pub mod convergence;
pub mod polling;
pub mod scheduler;

pub use barrier::{BarrierError, ConditionBarrier, WaitOutcome};
pub use condition::{AllOf, Condition, ConditionId, TimeElapsedCondition};
pub use config::ConvergenceConfig;
pub use convergence::{
    ConvergenceCheck, ConvergenceError, ConvergenceReport, InterfaceState, NeighborSource,
    NeighborState, PeerRecord, StabilityCriteria, StabilityProbe,
};
pub use polling::{PollingCondition, Sampler};
pub use scheduler::{Scheduler, SchedulerError};
