//! One-shot delay timer.
//!
//! Runs on the tokio timer, independent of the sequential queue. Each arm
//! gets an epoch; cancelling bumps the epoch so a late expiry does nothing,
//! and waits for an expiry that is already executing its callback.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Default)]
struct Slot {
    epoch: u64,
    cancel: Option<oneshot::Sender<()>>,
    firing: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    fired: Condvar,
}

impl Shared {
    fn begin_fire(&self, epoch: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.epoch != epoch {
            return false;
        }
        slot.cancel = None;
        slot.firing = true;
        true
    }

    fn end_fire(&self) {
        self.slot.lock().firing = false;
        self.fired.notify_all();
    }
}

/// Cancellable one-shot timer.
pub struct DelayTimer {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl DelayTimer {
    /// Create a timer driven by `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                fired: Condvar::new(),
            }),
            runtime,
        }
    }

    /// Arm the timer, replacing any earlier arming.
    ///
    /// `on_fire` runs on a runtime worker and should only hand work off.
    pub fn arm<F>(&self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let epoch = {
            let mut slot = self.shared.slot.lock();
            slot.epoch += 1;
            slot.cancel = Some(tx);
            slot.epoch
        };

        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    if shared.begin_fire(epoch) {
                        trace!(epoch, "delay timer fired");
                        on_fire();
                        shared.end_fire();
                    }
                }
                _ = rx => {
                    trace!(epoch, "delay timer cancelled");
                }
            }
        });
    }

    /// Disarm the timer and wait for an in-progress expiry to finish.
    pub fn cancel(&self) {
        let mut slot = self.shared.slot.lock();
        slot.epoch += 1;
        if let Some(tx) = slot.cancel.take() {
            let _ = tx.send(());
        }
        while slot.firing {
            self.shared.fired.wait(&mut slot);
        }
    }

    /// Returns `true` while armed and not yet fired.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.shared.slot.lock().cancel.is_some()
    }
}

impl std::fmt::Debug for DelayTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayTimer")
            .field("armed", &self.is_armed())
            .finish()
    }
}
