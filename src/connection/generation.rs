//! Connection attempt generations.
//!
//! Every accepted `connect` advances the generation. Deferred work captures
//! the [`Epoch`] it was scheduled in and becomes a no-op once the generation
//! has moved on.

/// Generation captured by a deferred continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(u64);

impl Epoch {
    /// Numeric value, for logging.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic attempt counter.
///
/// Owned by the state machine and only touched by the running queue unit,
/// so it needs no synchronization of its own.
#[derive(Debug, Default)]
pub struct Generation {
    current: u64,
}

impl Generation {
    /// Generation zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: 0 }
    }

    /// Start a new attempt and return its epoch.
    pub fn advance(&mut self) -> Epoch {
        self.current += 1;
        Epoch(self.current)
    }

    /// Epoch of the current attempt.
    #[must_use]
    pub const fn current(&self) -> Epoch {
        Epoch(self.current)
    }

    /// Returns `true` if `epoch` still belongs to the current attempt.
    #[must_use]
    pub const fn is_current(&self, epoch: Epoch) -> bool {
        epoch.0 == self.current
    }
}
