//! Teardown synchronization.
//!
//! Two independent conditions make destruction safe while completions may
//! still arrive on arbitrary threads:
//!
//! 1. [`DrainGate`]: once draining, completions are discarded before they
//!    touch connection state.
//! 2. [`ReleaseLatch`]: per transport resource, tracks
//!    `Open -> ReleaseRequested -> Released` and lets the teardown path block
//!    until the transport has confirmed the release.
//!
//! Marking alone is not enough: a completion may already be executing when
//! the gate closes, and only the release confirmation guarantees that the
//! transport will not deliver anything else for the handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::transport::{HandleId, Transport};

/// Lifecycle of one transport resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// In use.
    Open,
    /// `release` was called; waiting for `HandleClosing`.
    ReleaseRequested,
    /// The transport confirmed the release.
    Released,
}

/// Blocks the teardown path until the transport confirms a release.
#[derive(Debug)]
pub struct ReleaseLatch {
    state: Mutex<ResourceState>,
    released: Condvar,
}

impl Default for ReleaseLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseLatch {
    /// A latch for an open resource.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ResourceState::Open),
            released: Condvar::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ResourceState {
        *self.state.lock()
    }

    /// Record that release was requested.
    ///
    /// Returns `false` if the resource was already released.
    pub fn request_release(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ResourceState::Open => {
                *state = ResourceState::ReleaseRequested;
                true
            }
            ResourceState::ReleaseRequested => true,
            ResourceState::Released => false,
        }
    }

    /// Record the transport's release confirmation and wake waiters.
    pub fn mark_released(&self) {
        *self.state.lock() = ResourceState::Released;
        self.released.notify_all();
    }

    /// Block until [`mark_released`](Self::mark_released) has been called.
    pub fn wait_released(&self) {
        let mut state = self.state.lock();
        while *state != ResourceState::Released {
            self.released.wait(&mut state);
        }
    }
}

/// "Ignore further completions" flag, kept separate from the queue's exclusion.
#[derive(Debug, Default)]
pub struct DrainGate {
    draining: AtomicBool,
}

impl DrainGate {
    /// An open gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            draining: AtomicBool::new(false),
        }
    }

    /// Start discarding completions.
    pub fn begin(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Stop discarding completions.
    pub fn end(&self) {
        self.draining.store(false, Ordering::SeqCst);
    }

    /// Whether completions are currently discarded.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// The transport resource owned by the current connection attempt.
#[derive(Debug, Clone)]
pub(crate) struct TransportResource {
    pub(crate) handle: HandleId,
    pub(crate) latch: Arc<ReleaseLatch>,
}

impl TransportResource {
    pub(crate) fn new(handle: HandleId, latch: Arc<ReleaseLatch>) -> Self {
        Self { handle, latch }
    }

    /// Two-phase release: drain, request release, wait for confirmation.
    ///
    /// The gate is reopened afterwards; completions that were queued for the
    /// released handle are rejected later by handle comparison.
    pub(crate) fn release(self, transport: &dyn Transport, gate: &DrainGate) {
        gate.begin();
        if self.latch.request_release() {
            debug!(handle = %self.handle, "releasing transport handle");
            transport.release(self.handle);
            self.latch.wait_released();
            trace!(handle = %self.handle, "transport handle released");
        }
        gate.end();
    }
}
