//! Serialized execution: the sequential queue and the delay timer.

mod queue;
mod timer;

pub use queue::SequentialQueue;
pub use timer::DelayTimer;
