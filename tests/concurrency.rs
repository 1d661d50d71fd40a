//! Concurrency tests: ordering and single-flight execution under many producers.

mod harness;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use cwsock::executor::SequentialQueue;
use cwsock::{BufferKind, TransportEvent, WebSocket};
use harness::{Call, Event, MockTransport, Recorder};
use parking_lot::Mutex;

const THREADS: usize = 8;
const PER_THREAD: usize = 250;

/// Tracks how many units run at once.
#[derive(Default)]
struct Reentrancy {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Reentrancy {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Assert that for each producer its sequence numbers appear in order.
fn assert_per_producer_order(log: &[(usize, usize)]) {
    let mut next = vec![0usize; THREADS];
    for &(producer, seq) in log {
        assert_eq!(seq, next[producer], "producer {producer} out of order");
        next[producer] += 1;
    }
    assert!(next.iter().all(|&n| n == PER_THREAD));
}

#[test]
fn test_queue_many_producers_fifo_and_single_flight() {
    let rt = harness::runtime();
    let queue = Arc::new(SequentialQueue::new(rt.handle().clone()));
    let log = Arc::new(Mutex::new(Vec::with_capacity(THREADS * PER_THREAD)));
    let reentrancy = Arc::new(Reentrancy::default());

    let producers: Vec<_> = (0..THREADS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            let reentrancy = Arc::clone(&reentrancy);
            thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    let log = Arc::clone(&log);
                    let reentrancy = Arc::clone(&reentrancy);
                    assert!(queue.queue_work(move || {
                        reentrancy.enter();
                        log.lock().push((producer, seq));
                        reentrancy.exit();
                    }));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    queue.wait_for_drain();
    let log = log.lock();
    assert_eq!(log.len(), THREADS * PER_THREAD);
    assert_per_producer_order(&log);
    assert_eq!(reentrancy.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn test_queue_survives_panicking_units_under_load() {
    let rt = harness::runtime();
    let queue = Arc::new(SequentialQueue::new(rt.handle().clone()));
    let ran = Arc::new(AtomicUsize::new(0));

    for i in 0..100 {
        let ran = Arc::clone(&ran);
        queue.queue_work(move || {
            if i % 10 == 0 {
                panic!("unit {i} failed");
            }
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }
    queue.wait_for_drain();
    assert_eq!(ran.load(Ordering::SeqCst), 90);
}

#[test]
fn test_sends_from_many_threads_keep_per_thread_order() {
    let rt = harness::runtime();
    let _guard = rt.enter();
    let transport = MockTransport::auto_write();
    let ws = WebSocket::new(transport.clone());
    assert!(ws.initialize("example.com", 80, "/", false));
    let recorder = Recorder::attach(&ws);
    ws.connect(Duration::ZERO);
    recorder.wait_for(1);

    let senders: Vec<_> = (0..THREADS)
        .map(|producer| {
            let controller = ws.handle();
            thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    controller.send_text(&format!("{producer}:{seq}"));
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    let sends = transport.wait_for_calls(THREADS * PER_THREAD, |c| matches!(c, Call::Send(..)));
    let log: Vec<(usize, usize)> = sends
        .iter()
        .map(|call| match call {
            Call::Send(_, data, _) => {
                let text = std::str::from_utf8(data).unwrap();
                let (producer, seq) = text.split_once(':').unwrap();
                (producer.parse().unwrap(), seq.parse().unwrap())
            }
            other => unreachable!("{other:?}"),
        })
        .collect();
    assert_per_producer_order(&log);
    assert_eq!(recorder.events(), vec![Event::Open]);
}

#[test]
fn test_handlers_never_overlap() {
    let rt = harness::runtime();
    let _guard = rt.enter();
    let transport = MockTransport::new();
    let ws = WebSocket::new(transport.clone());
    assert!(ws.initialize("example.com", 80, "/", false));

    let reentrancy = Arc::new(Reentrancy::default());
    let received = Arc::new(AtomicUsize::new(0));
    {
        let reentrancy = Arc::clone(&reentrancy);
        let received = Arc::clone(&received);
        ws.on_text_message(move |_text: &str| {
            reentrancy.enter();
            thread::sleep(Duration::from_micros(50));
            received.fetch_add(1, Ordering::SeqCst);
            reentrancy.exit();
        });
    }
    let opens = Arc::new(AtomicUsize::new(0));
    {
        let opens = Arc::clone(&opens);
        ws.on_open(move || {
            opens.fetch_add(1, Ordering::SeqCst);
        });
    }
    ws.connect(Duration::ZERO);
    transport.wait_for(|c| matches!(c, Call::Receive(_)));
    let handle = transport.latest_handle();

    let deliverers: Vec<_> = (0..4)
        .map(|_| {
            let transport = Arc::clone(&transport);
            thread::spawn(move || {
                for _ in 0..50 {
                    transport.complete(
                        handle,
                        TransportEvent::ReadComplete {
                            data: Bytes::from_static(b"x"),
                            kind: BufferKind::TextMessage,
                        },
                    );
                }
            })
        })
        .collect();
    for deliverer in deliverers {
        deliverer.join().unwrap();
    }

    transport.wait_for_calls(201, |c| matches!(c, Call::Receive(_)));
    // The last receive is issued before its message is dispatched.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(received.load(Ordering::SeqCst), 200);
    assert_eq!(reentrancy.peak.load(Ordering::SeqCst), 1);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_while_completions_arrive() {
    let rt = harness::runtime();
    let _guard = rt.enter();
    let transport = MockTransport::new();
    let ws = WebSocket::new(transport.clone());
    assert!(ws.initialize("example.com", 80, "/", false));
    let recorder = Recorder::attach(&ws);
    ws.connect(Duration::ZERO);
    recorder.wait_for(1);
    let handle = transport.latest_handle();
    let sink = transport.sink(handle);

    let flood = thread::spawn(move || {
        for _ in 0..2_000 {
            sink.deliver(
                handle,
                TransportEvent::ReadComplete {
                    data: Bytes::from_static(b"y"),
                    kind: BufferKind::TextMessage,
                },
            );
        }
    });
    thread::sleep(Duration::from_millis(1));
    drop(ws);
    let after_drop = recorder.len();
    flood.join().unwrap();

    assert!(transport.calls().contains(&Call::Release(handle)));
    recorder.assert_quiet(after_drop);
}
