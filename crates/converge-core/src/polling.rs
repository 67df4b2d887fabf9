//! Polling conditions.
//!
//! Some facts are not edge-triggered: nobody tells us when a node's
//! adjacencies have been stable long enough, we can only look. A
//! [`PollingCondition`] wraps such a sampled predicate, re-evaluates it on
//! the [`Scheduler`] every poll interval, and notifies the barrier once it
//! holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::barrier::{BarrierError, ConditionBarrier};
use crate::condition::{Condition, ConditionId};
use crate::scheduler::Scheduler;

/// A predicate whose truth can only be discovered by sampling external state.
pub trait Sampler: Send + Sync + 'static {
    fn sample(&self) -> anyhow::Result<bool>;
}

impl<F> Sampler for F
where
    F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
{
    fn sample(&self) -> anyhow::Result<bool> {
        self()
    }
}

/// Condition driven by periodic sampling on a [`Scheduler`].
pub struct PollingCondition<S> {
    name: String,
    sampler: S,
    poll_interval: Duration,
    last: AtomicBool,
}

impl<S: Sampler> PollingCondition<S> {
    /// Creates the condition, registers it with `barrier`, and schedules the
    /// first poll one `poll_interval` from now.
    ///
    /// Each poll that finds the predicate true notifies the barrier; any other
    /// result reschedules the poll. A sampling error fails the scheduled
    /// callback, which ends [`Scheduler::run`].
    pub fn start(
        name: impl Into<String>,
        sampler: S,
        poll_interval: Duration,
        barrier: &Arc<ConditionBarrier>,
        scheduler: &Scheduler,
    ) -> Result<Arc<Self>, BarrierError> {
        let cond = Arc::new(Self {
            name: name.into(),
            sampler,
            poll_interval,
            last: AtomicBool::new(false),
        });
        let id = barrier.add_condition(cond.clone())?;
        cond.schedule(id, Arc::clone(barrier), scheduler);
        Ok(cond)
    }

    fn schedule(
        self: &Arc<Self>,
        id: ConditionId,
        barrier: Arc<ConditionBarrier>,
        scheduler: &Scheduler,
    ) {
        let cond = Arc::clone(self);
        scheduler.add_event(self.poll_interval, move |sched| cond.poll(id, barrier, sched));
    }

    fn poll(
        self: Arc<Self>,
        id: ConditionId,
        barrier: Arc<ConditionBarrier>,
        scheduler: &Scheduler,
    ) -> anyhow::Result<()> {
        // The predicate may flip back between our sample and the barrier's
        // re-evaluation; keep polling until the barrier accepts it.
        if self.is_true()? && barrier.notify(id)? {
            debug!("{} holds, notified {}", self.name, id);
            return Ok(());
        }
        trace!("{} not yet true, polling again in {:?}", self.name, self.poll_interval);
        self.schedule(id, barrier, scheduler);
        Ok(())
    }

    /// Result of the most recent evaluation.
    pub fn last_sample(&self) -> bool {
        self.last.load(Ordering::Relaxed)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl<S: Sampler> Condition for PollingCondition<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_true(&self) -> anyhow::Result<bool> {
        let value = self.sampler.sample()?;
        self.last.store(value, Ordering::Relaxed);
        Ok(value)
    }
}
