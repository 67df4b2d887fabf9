//! # Scheduler
//!
//! Single-threaded cooperative runner of delayed callbacks.
//!
//! [`Scheduler`] is a cheap, cloneable handle. Any thread may
//! [`add_event`](Scheduler::add_event) or [`stop`](Scheduler::stop); exactly
//! one thread drives callbacks through [`run`](Scheduler::run) (blocking, real
//! time) or [`run_pending`](Scheduler::run_pending) (non-blocking, fires what
//! is already due, for stepping a mocked clock in tests).
//!
//! Entries fire in due-time order; equal due times fire in the order they
//! were added. A delay too large for the clock never fires.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use quanta::{Clock, Instant};
use thiserror::Error;
use tracing::{debug, error, trace};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduled callback failed: {0:#}")]
    Callback(#[source] anyhow::Error),
}

type Callback = Box<dyn FnOnce(&Scheduler) -> anyhow::Result<()> + Send>;

struct Event {
    /// `None` is past the end of the clock.
    due: Option<Instant>,
    seq: u64,
    callback: Callback,
}

impl Event {
    fn key(&self) -> (bool, Option<Instant>, u64) {
        (self.due.is_none(), self.due, self.seq)
    }
}

// BinaryHeap is a max-heap; invert so the earliest (due, seq) pops first.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

struct SchedulerState {
    queue: BinaryHeap<Event>,
    next_seq: u64,
    running: bool,
    stopped: bool,
}

struct Shared {
    clock: Clock,
    state: Mutex<SchedulerState>,
    wakeup: Condvar,
}

/// Handle to a single-threaded event loop.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler on the real monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Creates a scheduler on the given clock, e.g. `quanta::Clock::mock()`.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                state: Mutex::new(SchedulerState {
                    queue: BinaryHeap::new(),
                    next_seq: 0,
                    running: false,
                    stopped: false,
                }),
                wakeup: Condvar::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The clock due times are measured on.
    pub fn clock(&self) -> Clock {
        self.shared.clock.clone()
    }

    /// Schedules `callback` to run on the scheduler thread no earlier than
    /// `delay` from now. Never blocks; callable from inside a callback.
    /// On a stopped scheduler the callback is dropped without running.
    pub fn add_event<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce(&Scheduler) -> anyhow::Result<()> + Send + 'static,
    {
        let due = self.shared.clock.now().checked_add(delay);
        let mut state = self.lock_state();
        if state.stopped {
            drop(state);
            trace!("scheduler stopped, dropping event");
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Event {
            due,
            seq,
            callback: Box::new(callback),
        });
        drop(state);
        trace!("scheduled event {} in {:?}", seq, delay);
        self.shared.wakeup.notify_all();
    }

    /// Runs callbacks until [`stop`](Self::stop) is requested.
    ///
    /// Sleeps until the earliest entry is due, then invokes it on this thread.
    /// A failing callback ends the loop and its error is returned.
    pub fn run(&self) -> Result<(), SchedulerError> {
        {
            let mut state = self.lock_state();
            if state.running {
                return Err(SchedulerError::AlreadyRunning);
            }
            state.running = true;
        }
        debug!("scheduler running");

        let _running = RunningGuard(self);
        let result = self.dispatch();
        debug!("scheduler exited");
        result
    }

    fn dispatch(&self) -> Result<(), SchedulerError> {
        while let Some(event) = self.next_event() {
            self.fire(event)?;
        }
        Ok(())
    }

    /// Blocks until an entry is due or the scheduler is stopped.
    fn next_event(&self) -> Option<Event> {
        let mut state = self.lock_state();
        loop {
            if state.stopped {
                return None;
            }
            let now = self.shared.clock.now();
            let next_due = state.queue.peek().map(|event| event.due);
            state = match next_due.flatten() {
                Some(due) if due <= now => return state.queue.pop(),
                Some(due) => {
                    self.shared
                        .wakeup
                        .wait_timeout(state, due.saturating_duration_since(now))
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self
                    .shared
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    /// Fires every entry already due, including ones those callbacks add
    /// with zero delay, without blocking. Returns how many fired.
    pub fn run_pending(&self) -> Result<usize, SchedulerError> {
        if self.lock_state().running {
            return Err(SchedulerError::AlreadyRunning);
        }
        let mut fired = 0;
        loop {
            let event = {
                let mut state = self.lock_state();
                if state.stopped {
                    break;
                }
                let now = self.shared.clock.now();
                match state.queue.peek().and_then(|event| event.due) {
                    Some(due) if due <= now => state.queue.pop(),
                    _ => None,
                }
            };
            let Some(event) = event else { break };
            self.fire(event)?;
            fired += 1;
        }
        Ok(fired)
    }

    fn fire(&self, event: Event) -> Result<(), SchedulerError> {
        let seq = event.seq;
        trace!("firing event {}", seq);
        (event.callback)(self).map_err(|err| {
            error!("scheduled callback {} failed: {:#}", seq, err);
            SchedulerError::Callback(err)
        })
    }

    /// Requests termination and drops every queued callback.
    ///
    /// From inside a callback, the loop ends once that callback returns. From
    /// another thread, it ends at the next scheduling decision. Stopping is
    /// permanent; `run` on a stopped scheduler returns at once.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if !state.stopped {
            debug!("stopping scheduler with {} pending events", state.queue.len());
        }
        state.stopped = true;
        let dropped = std::mem::take(&mut state.queue);
        drop(state);
        self.shared.wakeup.notify_all();
        // Callbacks may own handles to this scheduler; release them unlocked.
        drop(dropped);
    }

    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Number of entries waiting to fire.
    pub fn pending_events(&self) -> usize {
        self.lock_state().queue.len()
    }
}

/// Clears `running` when `run` exits, including by unwinding.
struct RunningGuard<'a>(&'a Scheduler);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.lock_state().running = false;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
