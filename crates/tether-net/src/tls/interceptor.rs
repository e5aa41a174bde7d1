//! The TLS interceptor: a [`Connection`] over a [`Socket`] that encrypts
//! outgoing packets and decrypts incoming records.
//!
//! All engine work happens on the reactor thread. Public methods flip atomics
//! and queue actions like the plain socket; only `listen` takes the session
//! lock, to install the observer before the wrapped socket can report anything.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use rustls::{ClientConfig, ServerConfig};
use tether_core::SharedSink;
use tether_core::logging::targets;
use tether_core::sink::guarded;

use super::HandshakeState;
use super::engine::{EngineStatus, RustlsEngine, TlsEngine};
use crate::connection::{Connection, Tag};
use crate::error::{NetError, Result, TlsError};
use crate::observer::SocketObserver;
use crate::packet::{
    PacketReader, PacketWriter, RawPacketReader, RawPacketWriter, codec_call,
};
use crate::tcp::{AtomicState, ConnectionId, Socket};

/// What an underlying `packet_sent` stands for.
enum Completion {
    /// Handshake or close-notify records.
    Control,
    /// Records carrying one application packet.
    Application(Option<Tag>),
}

struct HeldWrite {
    packet: Vec<u8>,
    tag: Option<Tag>,
    reserved: usize,
}

/// Reactor-side session state.
struct Interceptor {
    engine: Box<dyn TlsEngine>,
    observer: Option<Box<dyn SocketObserver>>,
    reader: Box<dyn PacketReader>,
    writer: Box<dyn PacketWriter>,
    plaintext: BytesMut,
    held: VecDeque<HeldWrite>,
    completions: VecDeque<Completion>,
    close_pending: bool,
    close_sent: bool,
}

struct TlsShared {
    socket: Socket,
    client: bool,
    state: AtomicState<HandshakeState>,
    closing: AtomicBool,
    observer_set: AtomicBool,
    interceptor: Mutex<Interceptor>,
}

/// A TLS session over a TCP [`Socket`].
///
/// Until [`begin_handshake`](Self::begin_handshake) is called, packets pass
/// through unencrypted. While the handshake runs, writes are held and sent in
/// order once it completes; the application never sees handshake records.
#[derive(Clone)]
pub struct TlsSocket {
    inner: Arc<TlsShared>,
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("id", &self.id())
            .field("client", &self.inner.client)
            .field("handshake", &self.handshake_state())
            .finish()
    }
}

impl TlsSocket {
    /// Wrap `socket` with `engine`. The socket must not have an observer yet.
    pub fn new(socket: Socket, engine: Box<dyn TlsEngine>) -> Self {
        socket.set_packet_reader(Box::new(RawPacketReader));
        socket.set_packet_writer(Box::new(RawPacketWriter));

        let client = engine.is_client();
        Self {
            inner: Arc::new(TlsShared {
                socket,
                client,
                state: AtomicState::new(HandshakeState::NotStarted),
                closing: AtomicBool::new(false),
                observer_set: AtomicBool::new(false),
                interceptor: Mutex::new(Interceptor {
                    engine,
                    observer: None,
                    reader: Box::new(RawPacketReader),
                    writer: Box::new(RawPacketWriter),
                    plaintext: BytesMut::new(),
                    held: VecDeque::new(),
                    completions: VecDeque::new(),
                    close_pending: false,
                    close_sent: false,
                }),
            }),
        }
    }

    /// Wrap `socket` as the client side, verifying the server as `server_name`.
    pub fn client(socket: Socket, config: Arc<ClientConfig>, server_name: &str) -> Result<Self> {
        let engine = RustlsEngine::client_for_host(config, server_name)?;
        Ok(Self::new(socket, Box::new(engine)))
    }

    /// Wrap `socket` as the server side.
    pub fn server(socket: Socket, config: Arc<ServerConfig>) -> Result<Self> {
        let engine = RustlsEngine::server(config)?;
        Ok(Self::new(socket, Box::new(engine)))
    }

    /// Start the handshake in the role chosen at construction.
    ///
    /// Fails with [`NetError::HandshakeInProgress`] while a handshake is
    /// running, leaving it untouched, and with
    /// [`NetError::InvalidHandshakeState`] once the session is established or failed.
    pub fn begin_handshake(&self) -> Result<()> {
        match self
            .inner
            .state
            .transition(HandshakeState::Handshaking, |s| s == HandshakeState::NotStarted)
        {
            Ok(_) => {}
            Err(HandshakeState::Handshaking) => return Err(NetError::HandshakeInProgress),
            Err(state) => return Err(NetError::InvalidHandshakeState(state)),
        }
        tracing::debug!(target: targets::TLS, id = %self.id(), client = self.inner.client, "handshake started");
        self.schedule(|ix, tls| ix.start(tls))
    }

    /// Current handshake state.
    pub fn handshake_state(&self) -> HandshakeState {
        self.inner.state.load()
    }

    /// Whether application data is being encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.handshake_state() == HandshakeState::Established
    }

    /// Whether this side is the TLS client.
    pub fn is_client(&self) -> bool {
        self.inner.client
    }

    /// The wrapped TCP socket.
    pub fn socket(&self) -> &Socket {
        &self.inner.socket
    }

    fn sink(&self) -> &SharedSink {
        self.inner.socket.sink()
    }

    /// Run `f` against the session on the reactor thread. An error fails the session.
    fn schedule(
        &self,
        f: impl FnOnce(&mut Interceptor, &TlsSocket) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        let tls = self.clone();
        self.inner.socket.queue(Box::new(move || tls.run(f)))
    }

    fn run(&self, f: impl FnOnce(&mut Interceptor, &TlsSocket) -> Result<()>) {
        let mut ix = self.inner.interceptor.lock();
        if let Err(err) = f(&mut *ix, self) {
            ix.fail(self, err);
        }
    }
}

impl Interceptor {
    fn start(&mut self, tls: &TlsSocket) -> Result<()> {
        self.engine.begin_handshake()?;
        self.drive(tls)
    }

    /// Feed the engine until it waits for the peer.
    fn drive(&mut self, tls: &TlsSocket) -> Result<()> {
        loop {
            match self.engine.status() {
                EngineStatus::NeedsWrap => {
                    let out = self.engine.wrap(&[])?;
                    if out.bytes.is_empty() {
                        break;
                    }
                    self.send(tls, out.bytes, Completion::Control, 0);
                }
                EngineStatus::NeedsTask => self.engine.run_delegated_task()?,
                EngineStatus::NeedsUnwrap => break,
                EngineStatus::Complete => {
                    if tls.handshake_state() == HandshakeState::Handshaking {
                        self.establish(tls)?;
                    }
                    break;
                }
                EngineStatus::Closed => {
                    // The peer may finish the handshake and close in one flight.
                    if tls.handshake_state() == HandshakeState::Handshaking {
                        if self.engine.is_handshaking() {
                            return Err(TlsError::Closed.into());
                        }
                        self.establish(tls)?;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    fn establish(&mut self, tls: &TlsSocket) -> Result<()> {
        let _ = tls
            .inner
            .state
            .transition(HandshakeState::Established, |s| s == HandshakeState::Handshaking);
        tracing::debug!(target: targets::TLS, id = %tls.id(), held = self.held.len(), "handshake complete");

        while let Some(held) = self.held.pop_front() {
            self.write_encrypted(tls, held.packet, held.tag, held.reserved)?;
        }
        self.deliver(tls)?;
        if self.close_pending {
            self.close_gracefully(tls)?;
        }
        Ok(())
    }

    /// Accept an application packet on the reactor thread.
    fn write(
        &mut self,
        tls: &TlsSocket,
        packet: Vec<u8>,
        tag: Option<Tag>,
        reserved: usize,
    ) -> Result<()> {
        match tls.handshake_state() {
            HandshakeState::NotStarted => {
                let writer = &mut self.writer;
                let encoded =
                    codec_call(tls.sink().as_ref(), "packet_writer", || writer.write(packet));
                let bytes = match encoded {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tls.inner.socket.release(reserved);
                        return Err(err.into());
                    }
                };
                self.send(tls, bytes, Completion::Application(tag), reserved);
                Ok(())
            }
            HandshakeState::Handshaking => {
                self.held.push_back(HeldWrite {
                    packet,
                    tag,
                    reserved,
                });
                Ok(())
            }
            HandshakeState::Established => self.write_encrypted(tls, packet, tag, reserved),
            HandshakeState::Failed => {
                tls.inner.socket.release(reserved);
                Ok(())
            }
        }
    }

    fn write_encrypted(
        &mut self,
        tls: &TlsSocket,
        packet: Vec<u8>,
        tag: Option<Tag>,
        reserved: usize,
    ) -> Result<()> {
        let writer = &mut self.writer;
        let encoded = codec_call(tls.sink().as_ref(), "packet_writer", || writer.write(packet));
        let encoded = match encoded {
            Ok(bytes) => bytes,
            Err(err) => {
                tls.inner.socket.release(reserved);
                return Err(err.into());
            }
        };
        let out = self.engine.wrap(&encoded)?;
        self.send(tls, out.bytes, Completion::Application(tag), reserved);
        Ok(())
    }

    /// Queue records on the wrapped socket, remembering what their completion means.
    ///
    /// An empty application packet still takes its place in the socket's write
    /// queue, so its `packet_sent` follows every packet queued before it.
    fn send(&mut self, tls: &TlsSocket, bytes: Vec<u8>, completion: Completion, reserved: usize) {
        if bytes.is_empty() && matches!(completion, Completion::Control) {
            return;
        }
        self.completions.push_back(completion);
        if !tls.inner.socket.enqueue_encoded(bytes, reserved) {
            self.completions.pop_back();
        }
    }

    /// Records arrived from the peer.
    fn receive(&mut self, tls: &TlsSocket, records: Vec<u8>) -> Result<()> {
        match tls.handshake_state() {
            HandshakeState::NotStarted => {
                self.plaintext.extend_from_slice(&records);
                self.deliver(tls)
            }
            HandshakeState::Handshaking | HandshakeState::Established => {
                let out = self.engine.unwrap(&records)?;
                self.plaintext.extend_from_slice(&out.bytes);
                self.drive(tls)?;

                if tls.handshake_state() == HandshakeState::Established {
                    self.deliver(tls)?;
                    if out.status == EngineStatus::Closed && !self.close_sent {
                        tracing::debug!(target: targets::TLS, id = %tls.id(), "peer sent close-notify");
                        tls.inner.closing.store(true, Ordering::Release);
                        self.close_gracefully(tls)?;
                    }
                }
                Ok(())
            }
            HandshakeState::Failed => Ok(()),
        }
    }

    /// Hand every complete plaintext packet to the application.
    fn deliver(&mut self, tls: &TlsSocket) -> Result<()> {
        while tls.is_open() {
            let (reader, buffer) = (&mut self.reader, &mut self.plaintext);
            let next = codec_call(tls.sink().as_ref(), "packet_reader", || {
                reader.next_packet(buffer)
            });
            let Some(packet) = next? else {
                break;
            };
            self.notify(tls, "packet_received", move |observer, conn| {
                observer.packet_received(conn, packet)
            });
        }
        Ok(())
    }

    fn request_close(&mut self, tls: &TlsSocket) -> Result<()> {
        match tls.handshake_state() {
            HandshakeState::Handshaking => {
                self.close_pending = true;
                Ok(())
            }
            HandshakeState::Established => self.close_gracefully(tls),
            HandshakeState::NotStarted | HandshakeState::Failed => {
                tls.inner.socket.close_after_write();
                Ok(())
            }
        }
    }

    /// Queue a close-notify, then close the wrapped socket once it is written.
    fn close_gracefully(&mut self, tls: &TlsSocket) -> Result<()> {
        if self.close_sent {
            return Ok(());
        }
        self.close_sent = true;
        self.engine.close_outbound();
        let out = self.engine.wrap(&[])?;
        self.send(tls, out.bytes, Completion::Control, 0);
        tls.inner.socket.close_after_write();
        Ok(())
    }

    fn sent(&mut self, tls: &TlsSocket) {
        match self.completions.pop_front() {
            Some(Completion::Application(tag)) => {
                self.notify(tls, "packet_sent", move |observer, conn| {
                    observer.packet_sent(conn, tag)
                });
            }
            Some(Completion::Control) | None => {}
        }
    }

    /// Report `err` to the application and close the wrapped socket.
    fn fail(&mut self, tls: &TlsSocket, err: NetError) {
        if matches!(err, NetError::Tls(_)) {
            tls.inner.state.swap(HandshakeState::Failed);
        }
        tracing::warn!(target: targets::TLS, id = %tls.id(), error = %err, "TLS session failed");

        self.held.clear();
        self.broken(tls, Some(&err));
        tls.inner.socket.close();
    }

    /// Tell the application the connection is gone. Only the first call has an effect.
    fn broken(&mut self, tls: &TlsSocket, cause: Option<&NetError>) {
        if let Some(mut observer) = self.observer.take() {
            guarded(tls.sink().as_ref(), "connection_broken", || {
                observer.connection_broken(tls, cause)
            });
        }
    }

    fn notify(
        &mut self,
        tls: &TlsSocket,
        site: &'static str,
        f: impl FnOnce(&mut dyn SocketObserver, &dyn Connection),
    ) {
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        guarded(tls.sink().as_ref(), site, || f(observer.as_mut(), tls));
    }
}

/// Observes the wrapped socket on behalf of the session.
struct TlsRelay {
    tls: TlsSocket,
}

impl SocketObserver for TlsRelay {
    fn connection_opened(&mut self, _socket: &dyn Connection) {
        let tls = &self.tls;
        tls.run(|ix, tls| {
            ix.notify(tls, "connection_opened", |observer, conn| {
                observer.connection_opened(conn)
            });
            Ok(())
        });
    }

    fn connection_broken(&mut self, _socket: &dyn Connection, cause: Option<&NetError>) {
        let tls = &self.tls;
        let mut ix = tls.inner.interceptor.lock();
        ix.held.clear();
        ix.completions.clear();
        ix.broken(tls, cause);
    }

    fn packet_received(&mut self, _socket: &dyn Connection, packet: Vec<u8>) {
        self.tls.run(|ix, tls| ix.receive(tls, packet));
    }

    fn packet_sent(&mut self, _socket: &dyn Connection, _tag: Option<Tag>) {
        let tls = &self.tls;
        tls.inner.interceptor.lock().sent(tls);
    }
}

impl Connection for TlsSocket {
    fn id(&self) -> ConnectionId {
        self.inner.socket.id()
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.socket.peer_addr()
    }

    fn is_open(&self) -> bool {
        self.inner.socket.is_open() && self.handshake_state() != HandshakeState::Failed
    }

    fn write_tagged(&self, packet: Vec<u8>, tag: Option<Tag>) -> bool {
        if self.inner.closing.load(Ordering::Acquire)
            || !self.inner.socket.state().accepts_writes()
            || self.handshake_state() == HandshakeState::Failed
        {
            return false;
        }
        let len = packet.len();
        if !self.inner.socket.try_reserve(len) {
            tracing::trace!(target: targets::TLS, id = %self.id(), len, "write rejected, queue full");
            return false;
        }
        if self
            .schedule(move |ix, tls| ix.write(tls, packet, tag, len))
            .is_err()
        {
            self.inner.socket.release(len);
            return false;
        }
        true
    }

    fn close(&self) {
        self.inner.closing.store(true, Ordering::Release);
        self.inner.socket.close();
    }

    fn close_after_write(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.schedule(|ix, tls| ix.request_close(tls));
    }

    fn listen(&self, observer: Box<dyn SocketObserver>) -> Result<()> {
        if self.inner.observer_set.swap(true, Ordering::AcqRel) {
            return Err(NetError::ObserverAlreadySet);
        }
        // The observer must be in place before the relay can see any event.
        self.inner.interceptor.lock().observer = Some(observer);
        if let Err(err) = self.inner.socket.listen(Box::new(TlsRelay { tls: self.clone() })) {
            self.inner.interceptor.lock().observer = None;
            self.inner.observer_set.store(false, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }

    fn set_packet_reader(&self, reader: Box<dyn PacketReader>) {
        let _ = self.schedule(move |ix, _tls| {
            ix.reader = reader;
            Ok(())
        });
    }

    fn set_packet_writer(&self, writer: Box<dyn PacketWriter>) {
        let _ = self.schedule(move |ix, _tls| {
            ix.writer = writer;
            Ok(())
        });
    }

    fn bytes_read(&self) -> u64 {
        self.inner.socket.bytes_read()
    }

    fn bytes_written(&self) -> u64 {
        self.inner.socket.bytes_written()
    }

    fn time_open(&self) -> Duration {
        self.inner.socket.time_open()
    }

    fn write_queue_size(&self) -> usize {
        self.inner.socket.write_queue_size()
    }

    fn max_queue_size(&self) -> Option<usize> {
        self.inner.socket.max_queue_size()
    }

    fn set_max_queue_size(&self, max: Option<usize>) {
        self.inner.socket.set_max_queue_size(max);
    }

    fn tag(&self) -> Option<Tag> {
        self.inner.socket.tag()
    }

    fn set_tag(&self, tag: Option<Tag>) {
        self.inner.socket.set_tag(tag);
    }

    fn queue(&self, action: Box<dyn FnOnce() + Send>) -> Result<()> {
        self.inner.socket.queue(action)
    }
}
