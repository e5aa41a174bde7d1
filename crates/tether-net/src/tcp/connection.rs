//! The application-facing handle to a TCP connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use mio::Token;
use parking_lot::Mutex;
use tether_core::SharedSink;
use tether_core::logging::targets;

use super::responders::ReactorHandle;
use super::state::{AtomicState, SocketState};
use crate::connection::{Connection, Tag};
use crate::error::{NetError, Result};
use crate::observer::SocketObserver;
use crate::packet::{PacketReader, PacketWriter};

/// Identifier of a TCP connection, unique within its reactor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a connection ID from its registration token.
    pub(crate) fn from_token(token: Token) -> Self {
        Self(token.0 as u64)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

const UNLIMITED: usize = usize::MAX;

/// State readable from any thread. Mutated through atomics only.
pub(crate) struct SocketShared {
    token: Token,
    peer_addr: SocketAddr,
    state: AtomicState<SocketState>,
    observer_set: AtomicBool,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    queued_bytes: AtomicUsize,
    max_queue_size: AtomicUsize,
    created_at: Instant,
    tag: Mutex<Option<Tag>>,
}

impl SocketShared {
    pub(crate) fn record_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Reserve room for `len` bytes, all or nothing.
    fn try_reserve(&self, len: usize) -> bool {
        let max = self.max_queue_size.load(Ordering::Acquire);
        self.queued_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                queued.checked_add(len).filter(|next| *next <= max)
            })
            .is_ok()
    }

    pub(crate) fn release(&self, len: usize) {
        if len == 0 {
            return;
        }
        let _ = self
            .queued_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                Some(queued.saturating_sub(len))
            });
    }

    pub(crate) fn clear_queue(&self) {
        self.queued_bytes.store(0, Ordering::Release);
    }

    /// Connecting -> Open, leaving Closing/Closed untouched.
    pub(crate) fn mark_connected(&self) {
        let _ = self
            .state
            .transition(SocketState::Open, |s| s == SocketState::Connecting);
    }

    pub(crate) fn mark_closed(&self) {
        self.state.swap(SocketState::Closed);
    }
}

/// Handle to a TCP connection owned by the reactor.
///
/// Cheap to clone and safe to use from any thread. All socket I/O happens on
/// the reactor thread; this handle only schedules work and reads counters.
#[derive(Clone)]
pub struct Socket {
    shared: Arc<SocketShared>,
    reactor: ReactorHandle,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id())
            .field("peer_addr", &self.shared.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Socket {
    pub(crate) fn new(
        reactor: ReactorHandle,
        token: Token,
        peer_addr: SocketAddr,
        state: SocketState,
        max_queue_size: Option<usize>,
    ) -> Self {
        Self {
            shared: Arc::new(SocketShared {
                token,
                peer_addr,
                state: AtomicState::new(state),
                observer_set: AtomicBool::new(false),
                bytes_read: AtomicU64::new(0),
                bytes_written: AtomicU64::new(0),
                queued_bytes: AtomicUsize::new(0),
                max_queue_size: AtomicUsize::new(max_queue_size.unwrap_or(UNLIMITED)),
                created_at: Instant::now(),
                tag: Mutex::new(None),
            }),
            reactor,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> SocketState {
        self.shared.state.load()
    }

    pub(crate) fn token(&self) -> Token {
        self.shared.token
    }

    pub(crate) fn shared(&self) -> &SocketShared {
        &self.shared
    }

    pub(crate) fn sink(&self) -> &SharedSink {
        self.reactor.sink()
    }

    /// Reserve write-queue room on behalf of a wrapping layer.
    pub(crate) fn try_reserve(&self, len: usize) -> bool {
        self.shared.try_reserve(len)
    }

    pub(crate) fn release(&self, len: usize) {
        self.shared.release(len);
    }

    /// Queue already-encoded bytes, bypassing the packet writer.
    ///
    /// Accepted while closing so a wrapping layer can flush its final records.
    /// On failure the reservation is released.
    pub(crate) fn enqueue_encoded(&self, bytes: Vec<u8>, reserved: usize) -> bool {
        if self.state() == SocketState::Closed {
            self.shared.release(reserved);
            return false;
        }
        let token = self.token();
        let queued = self.reactor.queue_with(move |responders, cx| {
            responders.enqueue(cx, token, bytes, None, reserved, false)
        });
        if queued.is_err() {
            self.shared.release(reserved);
            return false;
        }
        true
    }
}

impl Connection for Socket {
    fn id(&self) -> ConnectionId {
        ConnectionId::from_token(self.shared.token)
    }

    fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    fn is_open(&self) -> bool {
        self.state() != SocketState::Closed
    }

    fn write_tagged(&self, packet: Vec<u8>, tag: Option<Tag>) -> bool {
        if !self.state().accepts_writes() {
            return false;
        }
        let len = packet.len();
        if !self.shared.try_reserve(len) {
            tracing::trace!(target: targets::TCP, id = %self.id(), len, "write rejected, queue full");
            return false;
        }

        let token = self.token();
        let queued = self.reactor.queue_with(move |responders, cx| {
            responders.enqueue(cx, token, packet, tag, len, true)
        });
        if queued.is_err() {
            self.shared.release(len);
            return false;
        }
        true
    }

    fn close(&self) {
        if self.shared.state.swap(SocketState::Closed) == SocketState::Closed {
            return;
        }
        let token = self.token();
        let _ = self
            .reactor
            .queue_with(move |responders, cx| responders.close(cx, token, None));
    }

    fn close_after_write(&self) {
        if self
            .shared
            .state
            .transition(SocketState::Closing, SocketState::accepts_writes)
            .is_err()
        {
            return;
        }
        let token = self.token();
        let _ = self
            .reactor
            .queue_with(move |responders, cx| responders.close_after_write(cx, token));
    }

    fn listen(&self, observer: Box<dyn SocketObserver>) -> Result<()> {
        if self.shared.observer_set.swap(true, Ordering::AcqRel) {
            return Err(NetError::ObserverAlreadySet);
        }
        let socket = self.clone();
        self.reactor
            .queue_with(move |responders, cx| responders.listen(cx, socket, observer))?;
        Ok(())
    }

    fn set_packet_reader(&self, reader: Box<dyn PacketReader>) {
        let token = self.token();
        let _ = self
            .reactor
            .queue_with(move |responders, _cx| responders.set_packet_reader(token, reader));
    }

    fn set_packet_writer(&self, writer: Box<dyn PacketWriter>) {
        let token = self.token();
        let _ = self
            .reactor
            .queue_with(move |responders, _cx| responders.set_packet_writer(token, writer));
    }

    fn bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::Relaxed)
    }

    fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::Relaxed)
    }

    fn time_open(&self) -> Duration {
        self.shared.created_at.elapsed()
    }

    fn write_queue_size(&self) -> usize {
        self.shared.queued_bytes.load(Ordering::Acquire)
    }

    fn max_queue_size(&self) -> Option<usize> {
        match self.shared.max_queue_size.load(Ordering::Acquire) {
            UNLIMITED => None,
            max => Some(max),
        }
    }

    fn set_max_queue_size(&self, max: Option<usize>) {
        self.shared
            .max_queue_size
            .store(max.unwrap_or(UNLIMITED), Ordering::Release);
    }

    fn tag(&self) -> Option<Tag> {
        self.shared.tag.lock().clone()
    }

    fn set_tag(&self, tag: Option<Tag>) {
        *self.shared.tag.lock() = tag;
    }

    fn queue(&self, action: Box<dyn FnOnce() + Send>) -> Result<()> {
        self.reactor.queue(action)?;
        Ok(())
    }
}
