//! Tests for the reactor loop running on its own thread.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::mio::event::Event;
use tether_core::{Dispatch, EventLoop, LoopConfig, LoopContext, ReactorError, SharedSink};

#[derive(Default)]
struct Recorder {
    seen: Vec<u32>,
    shut_down: bool,
}

impl Dispatch for Recorder {
    fn dispatch(&mut self, _cx: &mut LoopContext<'_, Self>, _event: &Event) {}

    fn shutdown(&mut self, _cx: &mut LoopContext<'_, Self>) {
        self.shut_down = true;
    }
}

fn collecting_sink() -> (Arc<Mutex<Vec<String>>>, SharedSink) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let sink: SharedSink = Arc::new(move |error: &(dyn Error + 'static)| {
        captured.lock().push(error.to_string());
    });
    (seen, sink)
}

#[test]
fn test_actions_from_many_threads_each_keep_their_order() {
    let (_, sink) = collecting_sink();
    let reactor = EventLoop::new(Recorder::default(), LoopConfig::default(), sink).unwrap();
    let handle = reactor.handle();
    let log = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4u32)
        .map(|producer| {
            let handle = handle.clone();
            let log = log.clone();
            std::thread::spawn(move || {
                for seq in 0..100u32 {
                    let log = log.clone();
                    handle.queue(move || log.lock().push((producer, seq))).unwrap();
                }
            })
        })
        .collect();

    let thread = reactor.spawn().unwrap();
    for producer in producers {
        producer.join().unwrap();
    }

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    handle.queue(move || done_tx.send(()).unwrap()).unwrap();
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.stop();
    thread.join().unwrap().unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 400);
    for producer in 0..4u32 {
        let seqs: Vec<u32> = log
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(seqs, (0..100).collect::<Vec<_>>());
    }
}

#[test]
fn test_action_runs_on_reactor_thread() {
    let (_, sink) = collecting_sink();
    let reactor = EventLoop::new(Recorder::default(), LoopConfig::default(), sink).unwrap();
    let handle = reactor.handle();
    let thread = reactor.spawn().unwrap();

    let (tx, rx) = crossbeam_channel::bounded(1);
    let probe = handle.clone();
    handle
        .queue_with(move |state: &mut Recorder, _cx| {
            state.seen.push(1);
            tx.send(probe.is_loop_thread()).unwrap();
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert!(!handle.is_loop_thread());
    handle.stop();
    thread.join().unwrap().unwrap();
}

#[test]
fn test_panics_reach_the_sink_and_loop_survives() {
    let (seen, sink) = collecting_sink();
    let reactor = EventLoop::new(Recorder::default(), LoopConfig::default(), sink).unwrap();
    let handle = reactor.handle();
    let thread = reactor.spawn().unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    handle.queue(|| panic!("first")).unwrap();
    let counter = ran.clone();
    let (tx, rx) = crossbeam_channel::bounded(1);
    handle
        .queue(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        })
        .unwrap();

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.stop();
    thread.join().unwrap().unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("first"));
}

#[test]
fn test_queue_after_exit_fails() {
    let (_, sink) = collecting_sink();
    let reactor = EventLoop::new(Recorder::default(), LoopConfig::default(), sink).unwrap();
    let handle = reactor.handle();
    let thread = reactor.spawn().unwrap();

    handle.stop();
    thread.join().unwrap().unwrap();

    assert!(handle.is_stopped());
    assert!(matches!(handle.queue(|| {}), Err(ReactorError::Stopped)));
}
