//! Routing of transport completions to the owning client.
//!
//! Transports report every completion through one entry point, tagged only
//! with a [`HandleId`]. The router maps that handle to the client that owns
//! it and rejects handles it does not know, instead of trusting an opaque
//! context pointer.

use std::sync::{Arc, LazyLock, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use super::{HandleId, TransportEvent};
use crate::teardown::ReleaseLatch;

/// Receives completions for the handles it registered.
pub(crate) trait CompletionTarget: Send + Sync {
    fn on_completion(&self, handle: HandleId, event: TransportEvent);
}

struct Route {
    owner: Weak<dyn CompletionTarget>,
    latch: Arc<ReleaseLatch>,
}

/// Handle → owner table.
pub(crate) struct CompletionRouter {
    routes: RwLock<FxHashMap<HandleId, Route>>,
}

static GLOBAL_ROUTER: LazyLock<Arc<CompletionRouter>> =
    LazyLock::new(|| Arc::new(CompletionRouter::new()));

impl CompletionRouter {
    pub(crate) fn new() -> Self {
        Self {
            routes: RwLock::new(FxHashMap::default()),
        }
    }

    /// The process-wide router.
    pub(crate) fn global() -> Arc<CompletionRouter> {
        Arc::clone(&GLOBAL_ROUTER)
    }

    /// Register `handle` as owned by `owner`; returns its release latch.
    pub(crate) fn register(
        &self,
        handle: HandleId,
        owner: Weak<dyn CompletionTarget>,
    ) -> Arc<ReleaseLatch> {
        let latch = Arc::new(ReleaseLatch::new());
        self.routes.write().insert(
            handle,
            Route {
                owner,
                latch: Arc::clone(&latch),
            },
        );
        latch
    }

    /// Drop the route without waiting for the transport, e.g. when the
    /// upgrade request could not even be started.
    pub(crate) fn unregister(&self, handle: HandleId) {
        if let Some(route) = self.routes.write().remove(&handle) {
            route.latch.mark_released();
        }
    }

    /// Number of live routes.
    pub(crate) fn len(&self) -> usize {
        self.routes.read().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, handle: HandleId) -> bool {
        self.routes.read().contains_key(&handle)
    }

    fn deliver(&self, handle: HandleId, event: TransportEvent) {
        if event == TransportEvent::HandleClosing {
            match self.routes.write().remove(&handle) {
                Some(route) => {
                    trace!(%handle, "handle closing");
                    route.latch.mark_released();
                }
                None => warn!(%handle, "HandleClosing for unknown handle"),
            }
            return;
        }

        let owner = self
            .routes
            .read()
            .get(&handle)
            .and_then(|route| route.owner.upgrade());

        match owner {
            Some(owner) => owner.on_completion(handle, event),
            None => warn!(%handle, event = event.name(), "completion for unknown handle rejected"),
        }
    }
}

/// Where a transport delivers completions.
///
/// Cheap to clone; hand one to every task that reports completions.
#[derive(Clone)]
pub struct CompletionSink {
    router: Arc<CompletionRouter>,
}

impl CompletionSink {
    pub(crate) fn new(router: Arc<CompletionRouter>) -> Self {
        Self { router }
    }

    /// Deliver `event` for `handle`.
    ///
    /// Completions for handles that are not registered are logged and dropped.
    pub fn deliver(&self, handle: HandleId, event: TransportEvent) {
        self.router.deliver(handle, event);
    }
}

impl std::fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSink")
            .field("routes", &self.router.len())
            .finish()
    }
}
