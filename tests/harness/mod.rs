//! Shared fixtures for the integration tests.
//!
//! Tests drive a [`WebSocket`](cwsock::WebSocket) over a scripted
//! [`MockTransport`] and observe it through a [`Recorder`]. Each test owns a
//! multi-threaded runtime entered on the test thread, so the test body can
//! block while the queue runs on the runtime's blocking pool.

#![allow(dead_code)]

mod recorder;
mod transport;

pub use recorder::{Event, Recorder};
pub use transport::{Call, MockTransport};

use std::time::Duration;

/// How long any wait in the harness may take before the test fails.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A multi-threaded runtime for one test.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// Install a `tracing` subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
