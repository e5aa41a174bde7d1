//! Shared harness: a reactor on its own thread and observers that forward
//! every event to a channel.

#![allow(dead_code)]

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tether_net::{
    Connection, NetConfig, NetError, NetHandle, NetService, ServerSocketObserver, SharedSink,
    Socket, SocketObserver, Tag,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(300);

/// Connection events as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened,
    Broken(Option<String>),
    Received(Vec<u8>),
    Sent(Option<u32>),
}

/// Forwards connection events. Tags are expected to be `u32`s.
pub struct Recorder {
    tx: Sender<Event>,
}

impl Recorder {
    pub fn new() -> (Box<Self>, Receiver<Event>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Box::new(Self { tx }), rx)
    }
}

impl SocketObserver for Recorder {
    fn connection_opened(&mut self, _socket: &dyn Connection) {
        let _ = self.tx.send(Event::Opened);
    }

    fn connection_broken(&mut self, _socket: &dyn Connection, cause: Option<&NetError>) {
        let _ = self.tx.send(Event::Broken(cause.map(|err| err.to_string())));
    }

    fn packet_received(&mut self, _socket: &dyn Connection, packet: Vec<u8>) {
        let _ = self.tx.send(Event::Received(packet));
    }

    fn packet_sent(&mut self, _socket: &dyn Connection, tag: Option<Tag>) {
        let tag = tag.and_then(|tag| tag.downcast_ref::<u32>().copied());
        let _ = self.tx.send(Event::Sent(tag));
    }
}

pub fn tag(value: u32) -> Option<Tag> {
    Some(Arc::new(value))
}

/// Listener events.
#[derive(Debug)]
pub enum ServerEvent {
    New(Socket),
    AcceptFailed(String),
    Died(Option<String>),
}

pub struct ServerRecorder {
    tx: Sender<ServerEvent>,
}

impl ServerRecorder {
    pub fn new() -> (Box<Self>, Receiver<ServerEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Box::new(Self { tx }), rx)
    }
}

impl ServerSocketObserver for ServerRecorder {
    fn new_connection(&mut self, socket: Socket) {
        let _ = self.tx.send(ServerEvent::New(socket));
    }

    fn accept_failed(&mut self, cause: &NetError) {
        let _ = self.tx.send(ServerEvent::AcceptFailed(cause.to_string()));
    }

    fn server_socket_died(&mut self, cause: Option<&NetError>) {
        let _ = self.tx.send(ServerEvent::Died(cause.map(|err| err.to_string())));
    }
}

/// A reactor running on its own thread.
pub struct Reactor {
    pub handle: NetHandle,
    pub errors: Arc<Mutex<Vec<String>>>,
    thread: Option<JoinHandle<tether_core::Result<()>>>,
}

impl Reactor {
    pub fn start() -> Self {
        Self::with_config(NetConfig::default())
    }

    pub fn with_config(config: NetConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let captured = errors.clone();
        let sink: SharedSink = Arc::new(move |error: &(dyn Error + 'static)| {
            captured.lock().push(error.to_string());
        });

        let service = NetService::with_sink(config, sink).unwrap();
        let handle = service.handle();
        let thread = service.spawn().unwrap();
        Self {
            handle,
            errors,
            thread: Some(thread),
        }
    }

    pub fn stop(mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap().unwrap();
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

pub fn any_local() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

pub fn next<T>(rx: &Receiver<T>) -> T {
    rx.recv_timeout(TIMEOUT).expect("timed out waiting for an event")
}

/// Wait for the next event matching `pick`, skipping the others.
pub fn wait_for<T: std::fmt::Debug, R>(rx: &Receiver<T>, mut pick: impl FnMut(T) -> Option<R>) -> R {
    loop {
        if let Some(found) = pick(next(rx)) {
            return found;
        }
    }
}

pub fn accept(rx: &Receiver<ServerEvent>) -> Socket {
    match next(rx) {
        ServerEvent::New(socket) => socket,
        other => panic!("expected a new connection, got {other:?}"),
    }
}

pub fn received(rx: &Receiver<Event>, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|_| {
            wait_for(rx, |event| match event {
                Event::Received(packet) => Some(packet),
                _ => None,
            })
        })
        .collect()
}
