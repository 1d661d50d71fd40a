//! Sequential async queue.
//!
//! A FIFO of work units drained by a single implicit worker. The worker is a
//! pooled blocking task that runs one unit and then resubmits itself while
//! units remain, so no thread is parked waiting for work and no two units
//! ever run at the same time.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tracing::{error, trace};

type Unit = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    units: VecDeque<Unit>,
    /// A worker is scheduled or executing.
    running: bool,
    /// No further units are accepted.
    sealed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    idle: Condvar,
    runtime: Handle,
}

/// Single-flight FIFO executor.
pub struct SequentialQueue {
    shared: Arc<Shared>,
}

impl SequentialQueue {
    /// Create a queue whose worker runs on `runtime`'s blocking pool.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                idle: Condvar::new(),
                runtime,
            }),
        }
    }

    /// Append `work`. Returns `false` if the queue has been sealed.
    ///
    /// Safe to call from any thread, including from inside a running unit;
    /// such units run after everything already queued.
    pub fn queue_work<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(work), false)
    }

    /// Append `work` and seal the queue so that it is the last unit to run.
    pub fn queue_final<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(work), true)
    }

    /// Block until the queue is empty and no unit is executing.
    ///
    /// Must not be called from inside a unit.
    pub fn wait_for_drain(&self) {
        let mut state = self.shared.state.lock();
        while state.running || !state.units.is_empty() {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Number of units waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().units.len()
    }

    /// Returns `true` if no unit is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`queue_final`](Self::queue_final) has been called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.shared.state.lock().sealed
    }

    fn push(&self, unit: Unit, seal: bool) -> bool {
        let spawn = {
            let mut state = self.shared.state.lock();
            if state.sealed {
                trace!("queue sealed, unit dropped");
                return false;
            }
            state.units.push_back(unit);
            state.sealed = seal;
            !std::mem::replace(&mut state.running, true)
        };
        if spawn {
            submit(Arc::clone(&self.shared));
        }
        true
    }
}

impl std::fmt::Debug for SequentialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SequentialQueue")
            .field("pending", &state.units.len())
            .field("running", &state.running)
            .field("sealed", &state.sealed)
            .finish()
    }
}

fn submit(shared: Arc<Shared>) {
    let runtime = shared.runtime.clone();
    runtime.spawn_blocking(move || run_one(shared));
}

fn run_one(shared: Arc<Shared>) {
    let unit = {
        let mut state = shared.state.lock();
        match state.units.pop_front() {
            Some(unit) => unit,
            None => {
                state.running = false;
                shared.idle.notify_all();
                return;
            }
        }
    };

    if let Err(panic) = catch_unwind(AssertUnwindSafe(unit)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        error!(panic = %message, "queued unit panicked");
    }

    let more = {
        let mut state = shared.state.lock();
        if state.units.is_empty() {
            state.running = false;
            shared.idle.notify_all();
            false
        } else {
            true
        }
    };
    if more {
        submit(shared);
    }
}
