//! Predicates tracked by a [`ConditionBarrier`].
//!
//! A [`Condition`] is a named, side-effect-free boolean predicate that can be
//! queried from any thread. The barrier hands out a [`ConditionId`] when a
//! condition is registered; that id is what callers pass back to
//! [`ConditionBarrier::notify`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quanta::{Clock, Instant};
use tracing::debug;

use crate::barrier::{BarrierError, ConditionBarrier};
use crate::scheduler::Scheduler;

static NEXT_CONDITION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a registered condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionId(u64);

impl ConditionId {
    /// Ids increase monotonically, so ordering by id is registration order.
    pub(crate) fn next() -> Self {
        Self(NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cond#{}", self.0)
    }
}

/// A boolean predicate whose truth the barrier waits for.
///
/// Implementations must not touch the barrier they are registered with from
/// inside `is_true`: the barrier evaluates predicates while holding its lock.
pub trait Condition: Send + Sync {
    /// Human-readable label used in logs and timeout reports.
    fn name(&self) -> &str;

    /// Evaluates the predicate. Errors propagate to whoever asked.
    fn is_true(&self) -> anyhow::Result<bool>;
}

/// True once a fixed amount of time has passed on a clock.
#[derive(Debug)]
pub struct TimeElapsedCondition {
    name: String,
    clock: Clock,
    /// `None` when `elapsed` runs past the end of the clock.
    done: Option<Instant>,
}

impl TimeElapsedCondition {
    pub fn new(name: impl Into<String>, elapsed: Duration, clock: Clock) -> Self {
        let done = clock.now().checked_add(elapsed);
        Self {
            name: name.into(),
            clock,
            done,
        }
    }

    /// Creates the condition on the scheduler's clock, registers it with the
    /// barrier, and schedules the notify for when it becomes true.
    pub fn start(
        name: impl Into<String>,
        elapsed: Duration,
        barrier: &Arc<ConditionBarrier>,
        scheduler: &Scheduler,
    ) -> Result<Arc<Self>, BarrierError> {
        let cond = Arc::new(Self::new(name, elapsed, scheduler.clock()));
        let id = barrier.add_condition(cond.clone())?;
        schedule_elapsed(Arc::clone(&cond), id, Arc::clone(barrier), scheduler, elapsed);
        Ok(cond)
    }

    /// Time left until the condition holds.
    pub fn remaining(&self) -> Duration {
        match self.done {
            Some(done) => done.saturating_duration_since(self.clock.now()),
            None => Duration::MAX,
        }
    }
}

impl Condition for TimeElapsedCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_true(&self) -> anyhow::Result<bool> {
        Ok(self.done.is_some_and(|done| self.clock.now() >= done))
    }
}

fn schedule_elapsed(
    cond: Arc<TimeElapsedCondition>,
    id: ConditionId,
    barrier: Arc<ConditionBarrier>,
    scheduler: &Scheduler,
    delay: Duration,
) {
    scheduler.add_event(delay, move |sched| {
        let remaining = cond.remaining();
        if remaining.is_zero() {
            debug!("{} elapsed, notifying {}", cond.name, id);
            barrier.notify(id)?;
        } else {
            schedule_elapsed(cond, id, barrier, sched, remaining);
        }
        Ok(())
    });
}

/// Composite condition, true when every part is true.
///
/// Parts are evaluated in order and evaluation stops at the first false one.
pub struct AllOf {
    name: String,
    parts: Vec<Arc<dyn Condition>>,
}

impl AllOf {
    pub fn new(name: impl Into<String>, parts: Vec<Arc<dyn Condition>>) -> Self {
        Self {
            name: name.into(),
            parts,
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl Condition for AllOf {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_true(&self) -> anyhow::Result<bool> {
        for part in &self.parts {
            if !part.is_true()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
