//! # Condition Barrier
//!
//! Blocks callers until every registered [`Condition`] has been confirmed
//! true, or until a deadline passes.
//!
//! Conditions move one way: from `pending` to `satisfied`. Once the pending
//! set drains the barrier latches `complete` and wakes every waiter. All
//! state lives behind one mutex; [`ConditionBarrier::wait`] takes that lock
//! once per iteration, evaluates, and hands it to the condvar while blocked.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use quanta::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::condition::{Condition, ConditionId};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BarrierError {
    #[error("all conditions already satisfied")]
    InvalidState,
    #[error("unknown condition: {0}")]
    UnknownCondition(ConditionId),
    #[error("condition {name} ({id}) regressed after being satisfied")]
    InvariantViolation { id: ConditionId, name: String },
    #[error("barrier timed out but no timeout handler is configured")]
    TimeoutNotConfigured,
    #[error("timeout: {0}")]
    TimeoutHandler(#[source] anyhow::Error),
    #[error("evaluating condition {name} ({id}) failed")]
    Predicate {
        id: ConditionId,
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("wait aborted: {0}")]
    Aborted(String),
}

/// How a successful [`ConditionBarrier::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
}

type TimeoutHandler = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

struct BarrierState {
    // Keyed by id so iteration follows registration order.
    pending: BTreeMap<ConditionId, Arc<dyn Condition>>,
    satisfied: HashMap<ConditionId, Arc<dyn Condition>>,
    complete: bool,
    aborted: Option<String>,
    on_timeout: Option<TimeoutHandler>,
}

impl BarrierState {
    /// Moves `id` to the satisfied set. Returns true if that completed the barrier.
    fn mark_satisfied(&mut self, id: ConditionId) -> bool {
        if let Some(cond) = self.pending.remove(&id) {
            debug!("condition {} ({}) satisfied", cond.name(), id);
            self.satisfied.insert(id, cond);
        }
        if self.pending.is_empty() && !self.complete {
            self.complete = true;
            return true;
        }
        false
    }

    /// Evaluates pending conditions in registration order, stopping at the
    /// first one that is still false. Returns whether the barrier is complete.
    fn sweep(&mut self) -> Result<bool, BarrierError> {
        if self.complete {
            return Ok(true);
        }
        while let Some((&id, cond)) = self.pending.first_key_value() {
            if !evaluate(id, cond.as_ref())? {
                return Ok(false);
            }
            self.mark_satisfied(id);
        }
        self.complete = true;
        Ok(true)
    }
}

fn evaluate(id: ConditionId, cond: &dyn Condition) -> Result<bool, BarrierError> {
    cond.is_true().map_err(|source| BarrierError::Predicate {
        id,
        name: cond.name().to_string(),
        source,
    })
}

/// Synchronization point over a dynamic set of conditions.
///
/// Safe to share between threads; typically held in an `Arc` so scheduled
/// callbacks can [`notify`](Self::notify) it while another thread is in
/// [`wait`](Self::wait).
pub struct ConditionBarrier {
    state: Mutex<BarrierState>,
    changed: Condvar,
}

impl ConditionBarrier {
    /// Creates an empty barrier with no timeout handler.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                pending: BTreeMap::new(),
                satisfied: HashMap::new(),
                complete: false,
                aborted: None,
                on_timeout: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Creates a barrier that runs `handler` when a wait times out.
    pub fn with_timeout_handler<F>(handler: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let barrier = Self::new();
        barrier.set_timeout_handler(handler);
        barrier
    }

    /// Installs or replaces the timeout handler.
    ///
    /// The handler runs on the waiting thread after the barrier lock has been
    /// released. Returning an error marks the timeout as fatal; `wait` then
    /// fails with [`BarrierError::TimeoutHandler`].
    pub fn set_timeout_handler<F>(&self, handler: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lock_state().on_timeout = Some(Arc::new(handler));
    }

    fn lock_state(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a condition and returns the id to notify it by.
    ///
    /// Fails with [`BarrierError::InvalidState`] once the barrier is complete.
    pub fn add_condition(&self, cond: Arc<dyn Condition>) -> Result<ConditionId, BarrierError> {
        let mut state = self.lock_state();
        if state.complete {
            return Err(BarrierError::InvalidState);
        }
        let id = ConditionId::next();
        debug!("adding condition {} ({})", cond.name(), id);
        state.pending.insert(id, cond);
        drop(state);
        self.changed.notify_all();
        Ok(id)
    }

    /// Tells the barrier that condition `id` has become true.
    ///
    /// The predicate is re-evaluated. A pending condition that turns out to
    /// be false is left pending and `Ok(false)` is returned. A satisfied
    /// condition that now evaluates false is an invariant violation.
    pub fn notify(&self, id: ConditionId) -> Result<bool, BarrierError> {
        let mut state = self.lock_state();

        if let Some(cond) = state.satisfied.get(&id) {
            if evaluate(id, cond.as_ref())? {
                return Ok(true);
            }
            error!("condition {} ({}) regressed after being satisfied", cond.name(), id);
            return Err(BarrierError::InvariantViolation {
                id,
                name: cond.name().to_string(),
            });
        }

        let cond = match state.pending.get(&id) {
            Some(cond) => Arc::clone(cond),
            None => return Err(BarrierError::UnknownCondition(id)),
        };
        if !evaluate(id, cond.as_ref())? {
            debug!("premature notify for {} ({})", cond.name(), id);
            return Ok(false);
        }
        if state.mark_satisfied(id) {
            info!("all {} conditions satisfied", state.satisfied.len());
        }
        drop(state);
        // Waiters re-sweep on every satisfy, not only on completion.
        self.changed.notify_all();
        Ok(true)
    }

    /// Blocks until every condition is satisfied or `timeout` elapses.
    ///
    /// `None` waits without a deadline, as does a timeout too large to
    /// represent on the clock. The deadline is absolute, so spurious wakeups
    /// neither shorten nor extend the wait. On timeout the configured
    /// handler runs once for this call; without one the call fails with
    /// [`BarrierError::TimeoutNotConfigured`]. Safe to call again, and from
    /// several threads at once.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<WaitOutcome, BarrierError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.lock_state();

        let handler = loop {
            if let Some(reason) = &state.aborted {
                return Err(BarrierError::Aborted(reason.clone()));
            }
            let was_complete = state.complete;
            if state.sweep()? {
                if !was_complete {
                    info!("barrier complete with {} conditions", state.satisfied.len());
                    drop(state);
                    self.changed.notify_all();
                }
                return Ok(WaitOutcome::Satisfied);
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break state.on_timeout.clone();
                    }
                    Some(deadline.saturating_duration_since(now))
                }
                None => None,
            };
            state = match remaining {
                Some(remaining) => {
                    self.changed
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.changed.wait(state).unwrap_or_else(|e| e.into_inner()),
            };
        };
        drop(state);

        let pending = self.pending_names();
        warn!("barrier timed out with {} pending: {:?}", pending.len(), pending);
        match handler {
            Some(handler) => {
                handler().map_err(BarrierError::TimeoutHandler)?;
                Ok(WaitOutcome::TimedOut)
            }
            None => Err(BarrierError::TimeoutNotConfigured),
        }
    }

    /// Wakes every waiter and makes pending and future waits fail with
    /// [`BarrierError::Aborted`]. Has no effect on a complete barrier.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut state = self.lock_state();
        if state.complete {
            return;
        }
        let reason = reason.into();
        warn!("aborting barrier: {}", reason);
        state.aborted = Some(reason);
        drop(state);
        self.changed.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        self.lock_state().complete
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn satisfied_count(&self) -> usize {
        self.lock_state().satisfied.len()
    }

    /// Names of conditions not yet satisfied, in registration order.
    pub fn pending_names(&self) -> Vec<String> {
        self.lock_state()
            .pending
            .values()
            .map(|cond| cond.name().to_string())
            .collect()
    }
}

impl Default for ConditionBarrier {
    fn default() -> Self {
        Self::new()
    }
}
