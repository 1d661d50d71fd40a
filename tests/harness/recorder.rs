//! Records handler invocations in order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cwsock::{Error, WebSocket};
use parking_lot::{Condvar, Mutex};

use super::TIMEOUT;

/// One handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Binary(Vec<u8>),
    Text(String),
    Close(u16, Option<String>, bool),
    Closing(u16, Option<String>, bool),
    Closed,
    Error(Error),
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    changed: Condvar,
}

impl Recorder {
    /// A recorder registered in all seven slots of `ws`.
    pub fn attach(ws: &WebSocket) -> Arc<Self> {
        let recorder = Arc::new(Self::default());
        let r = Arc::clone(&recorder);
        ws.on_open({
            let r = Arc::clone(&r);
            move || r.push(Event::Open)
        })
        .on_binary_message({
            let r = Arc::clone(&r);
            move |data: &[u8]| r.push(Event::Binary(data.to_vec()))
        })
        .on_text_message({
            let r = Arc::clone(&r);
            move |text: &str| r.push(Event::Text(text.to_owned()))
        })
        .on_close({
            let r = Arc::clone(&r);
            move |code: cwsock::CloseCode, reason: Option<&str>, clean: bool| {
                r.push(Event::Close(code.as_u16(), reason.map(str::to_owned), clean))
            }
        })
        .on_closing({
            let r = Arc::clone(&r);
            move |code: cwsock::CloseCode, reason: Option<&str>, clean: bool| {
                r.push(Event::Closing(code.as_u16(), reason.map(str::to_owned), clean))
            }
        })
        .on_closed({
            let r = Arc::clone(&r);
            move || r.push(Event::Closed)
        })
        .on_error(move |err: &Error| r.push(Event::Error(err.clone())));
        recorder
    }

    pub fn push(&self, event: Event) {
        self.events.lock().push(event);
        self.changed.notify_all();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Block until at least `count` events were recorded; returns all of them.
    pub fn wait_for(&self, count: usize) -> Vec<Event> {
        let deadline = Instant::now() + TIMEOUT;
        let mut events = self.events.lock();
        while events.len() < count {
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                panic!("timed out waiting for {count} events; got {:?}", *events);
            }
        }
        events.clone()
    }

    /// Assert that nothing else arrives for a short while.
    pub fn assert_quiet(&self, expected: usize) {
        std::thread::sleep(Duration::from_millis(100));
        let events = self.events();
        assert_eq!(events.len(), expected, "unexpected events: {events:?}");
    }
}
