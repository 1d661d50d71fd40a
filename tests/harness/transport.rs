//! A scripted transport that records every call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cwsock::{
    BufferKind, CloseStatus, CompletionSink, Endpoint, HandleId, MessageKind, Transport,
    TransportError, TransportEvent,
};
use parking_lot::{Condvar, Mutex};

use super::TIMEOUT;

/// One call made on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Upgrade(HandleId),
    ReceiveUpgrade(HandleId),
    Receive(HandleId),
    Send(HandleId, Bytes, MessageKind),
    Close(HandleId, u16, Bytes),
    Release(HandleId),
}

impl Call {
    pub fn handle(&self) -> HandleId {
        match self {
            Call::Upgrade(h)
            | Call::ReceiveUpgrade(h)
            | Call::Receive(h)
            | Call::Send(h, ..)
            | Call::Close(h, ..)
            | Call::Release(h) => *h,
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    sinks: HashMap<HandleId, CompletionSink>,
    close_status: HashMap<HandleId, CloseStatus>,
}

/// Records calls and completes them only when told to, except for the
/// optional automatic behaviors.
pub struct MockTransport {
    state: Mutex<State>,
    changed: Condvar,
    auto_handshake: bool,
    auto_write: bool,
    release_delay: Option<Duration>,
}

impl MockTransport {
    /// Completes the upgrade automatically; writes stay in flight.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(true, false, None))
    }

    /// Completes nothing on its own except the release.
    pub fn manual() -> Arc<Self> {
        Arc::new(Self::build(false, false, None))
    }

    /// Completes the upgrade and every write automatically.
    pub fn auto_write() -> Arc<Self> {
        Arc::new(Self::build(true, true, None))
    }

    /// Like [`new`](Self::new), but confirms a release only after `delay`,
    /// from another thread.
    pub fn slow_release(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(true, false, Some(delay)))
    }

    fn build(auto_handshake: bool, auto_write: bool, release_delay: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
            auto_handshake,
            auto_write,
            release_delay,
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
        self.changed.notify_all();
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Calls matching `pred`.
    pub fn calls_matching(&self, pred: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.state.lock().calls.iter().filter(|c| pred(c)).cloned().collect()
    }

    /// Block until `count` calls match `pred`; returns them.
    pub fn wait_for_calls(&self, count: usize, pred: impl Fn(&Call) -> bool) -> Vec<Call> {
        let deadline = Instant::now() + TIMEOUT;
        let mut state = self.state.lock();
        loop {
            let matching: Vec<Call> = state.calls.iter().filter(|c| pred(c)).cloned().collect();
            if matching.len() >= count {
                return matching;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                panic!(
                    "timed out waiting for {count} matching calls; calls: {:?}",
                    state.calls
                );
            }
        }
    }

    /// Block until one call matches `pred`; returns the first.
    pub fn wait_for(&self, pred: impl Fn(&Call) -> bool) -> Call {
        self.wait_for_calls(1, pred).remove(0)
    }

    /// Handle of the most recent upgrade.
    pub fn latest_handle(&self) -> HandleId {
        self.state
            .lock()
            .calls
            .iter()
            .rev()
            .find_map(|c| match c {
                Call::Upgrade(h) => Some(*h),
                _ => None,
            })
            .expect("no upgrade issued")
    }

    /// Deliver `event` for `handle`, as the transport would.
    pub fn complete(&self, handle: HandleId, event: TransportEvent) {
        let sink = self.state.lock().sinks.get(&handle).cloned();
        match sink {
            Some(sink) => sink.deliver(handle, event),
            None => panic!("complete on unknown handle {handle}"),
        }
    }

    /// The sink registered with `handle`, for delivering after release.
    pub fn sink(&self, handle: HandleId) -> CompletionSink {
        self.state
            .lock()
            .sinks
            .get(&handle)
            .cloned()
            .expect("unknown handle")
    }

    /// Deliver a received message in one buffer.
    pub fn receive_text(&self, handle: HandleId, text: &str) {
        self.complete(
            handle,
            TransportEvent::ReadComplete {
                data: Bytes::copy_from_slice(text.as_bytes()),
                kind: BufferKind::TextMessage,
            },
        );
    }

    /// Simulate the peer's close frame.
    pub fn remote_close(&self, handle: HandleId, code: u16, reason: &str) {
        self.set_close_status(handle, code, reason);
        self.complete(
            handle,
            TransportEvent::ReadComplete {
                data: Bytes::new(),
                kind: BufferKind::Close,
            },
        );
    }

    /// Status reported by `query_close_status`.
    pub fn set_close_status(&self, handle: HandleId, code: u16, reason: &str) {
        self.state.lock().close_status.insert(
            handle,
            CloseStatus::new(code, Bytes::copy_from_slice(reason.as_bytes())),
        );
    }
}

impl Transport for MockTransport {
    fn send_upgrade_request(
        &self,
        handle: HandleId,
        _endpoint: &Endpoint,
        sink: CompletionSink,
    ) -> Result<(), TransportError> {
        self.state.lock().sinks.insert(handle, sink);
        self.record(Call::Upgrade(handle));
        if self.auto_handshake {
            self.complete(handle, TransportEvent::UpgradeRequestSent);
        }
        Ok(())
    }

    fn receive_upgrade_response(&self, handle: HandleId) -> Result<(), TransportError> {
        self.record(Call::ReceiveUpgrade(handle));
        if self.auto_handshake {
            self.complete(handle, TransportEvent::UpgradeResponseReceived);
        }
        Ok(())
    }

    fn receive(&self, handle: HandleId) -> Result<(), TransportError> {
        self.record(Call::Receive(handle));
        Ok(())
    }

    fn send(&self, handle: HandleId, data: Bytes, kind: MessageKind) -> Result<(), TransportError> {
        self.record(Call::Send(handle, data, kind));
        if self.auto_write {
            self.complete(handle, TransportEvent::WriteComplete);
        }
        Ok(())
    }

    fn close(&self, handle: HandleId, status: u16, reason: Bytes) -> Result<(), TransportError> {
        self.record(Call::Close(handle, status, reason));
        Ok(())
    }

    fn query_close_status(&self, handle: HandleId) -> Result<CloseStatus, TransportError> {
        self.state
            .lock()
            .close_status
            .get(&handle)
            .cloned()
            .ok_or_else(|| TransportError::Io("no close frame received".into()))
    }

    fn release(&self, handle: HandleId) {
        let sink = self.state.lock().sinks.remove(&handle);
        self.record(Call::Release(handle));
        let Some(sink) = sink else {
            return;
        };
        match self.release_delay {
            None => sink.deliver(handle, TransportEvent::HandleClosing),
            Some(delay) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    sink.deliver(handle, TransportEvent::HandleClosing);
                });
            }
        }
    }
}
