//! Reactor-side state of one connection.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use bytes::BytesMut;
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Token};
use tether_core::LoopContext;
use tether_core::logging::targets;
use tether_core::sink::guarded;

use super::config::TcpSocketConfig;
use super::connection::Socket;
use super::responders::{ReactorHandle, Responders};
use super::state::SocketState;
use crate::connection::{Connection, Tag};
use crate::error::NetError;
use crate::observer::SocketObserver;
use crate::packet::{
    PacketReader, PacketWriter, RawPacketReader, RawPacketWriter, codec_call,
};

type Cx<'a> = LoopContext<'a, Responders>;

/// What the registry should do with a responder after it handled something.
pub(crate) enum Outcome {
    Open,
    Closed(Option<NetError>),
}

struct WriteEntry {
    bytes: Vec<u8>,
    written: usize,
    tag: Option<Tag>,
    reserved: usize,
}

/// Owns a connection's stream, buffers and codec. Lives on the reactor thread.
pub(crate) struct ConnectionResponder {
    socket: Socket,
    stream: TcpStream,
    observer: Option<Box<dyn SocketObserver>>,
    reader: Box<dyn PacketReader>,
    writer: Box<dyn PacketWriter>,
    read_buffer: BytesMut,
    scratch: Vec<u8>,
    write_queue: VecDeque<WriteEntry>,
    connected: bool,
    registered: bool,
    close_after_write: bool,
}

impl ConnectionResponder {
    /// A connection whose non-blocking connect is still in flight.
    pub(crate) fn outbound(
        reactor: &ReactorHandle,
        stream: TcpStream,
        addr: SocketAddr,
        config: &TcpSocketConfig,
    ) -> Self {
        let socket = Socket::new(
            reactor.clone(),
            reactor.next_token(),
            addr,
            SocketState::Connecting,
            config.max_queue_size,
        );
        Self::new(socket, stream, false, config)
    }

    /// A connection handed over by a listener.
    pub(crate) fn accepted(
        reactor: &ReactorHandle,
        stream: TcpStream,
        addr: SocketAddr,
        config: &TcpSocketConfig,
    ) -> Self {
        let socket = Socket::new(
            reactor.clone(),
            reactor.next_token(),
            addr,
            SocketState::Open,
            config.max_queue_size,
        );
        Self::new(socket, stream, true, config)
    }

    fn new(socket: Socket, stream: TcpStream, connected: bool, config: &TcpSocketConfig) -> Self {
        if config.no_delay {
            if let Err(error) = stream.set_nodelay(true) {
                tracing::warn!(target: targets::TCP, id = %socket.id(), %error, "failed to set TCP_NODELAY");
            }
        }
        Self {
            socket,
            stream,
            observer: None,
            reader: Box::new(RawPacketReader),
            writer: Box::new(RawPacketWriter),
            read_buffer: BytesMut::with_capacity(config.read_buffer_size),
            scratch: vec![0; config.read_buffer_size.max(1)],
            write_queue: VecDeque::new(),
            connected,
            registered: false,
            close_after_write: false,
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.socket.token()
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    pub(crate) fn set_packet_reader(&mut self, reader: Box<dyn PacketReader>) {
        self.reader = reader;
    }

    pub(crate) fn set_packet_writer(&mut self, writer: Box<dyn PacketWriter>) {
        self.writer = writer;
    }

    /// Install the observer and start receiving readiness events.
    pub(crate) fn attach(&mut self, cx: &mut Cx<'_>, observer: Box<dyn SocketObserver>) -> Outcome {
        self.observer = Some(observer);

        let token = self.token();
        if let Err(err) =
            cx.registry()
                .register(&mut self.stream, token, Interest::READABLE | Interest::WRITABLE)
        {
            return Outcome::Closed(Some(NetError::Io(err)));
        }
        self.registered = true;

        if !self.connected {
            return Outcome::Open;
        }
        self.notify(cx, "connection_opened", |observer, socket| {
            observer.connection_opened(socket)
        });
        self.flush(cx)
    }

    /// Handle a readiness event.
    pub(crate) fn ready(&mut self, cx: &mut Cx<'_>, event: &Event) -> Outcome {
        if !self.connected {
            match self.finish_connect(cx) {
                Ok(true) => {}
                Ok(false) => return Outcome::Open,
                Err(err) => return Outcome::Closed(Some(err)),
            }
        }

        if event.is_error() {
            if let Ok(Some(err)) | Err(err) = self.stream.take_error() {
                return Outcome::Closed(Some(NetError::Io(err)));
            }
        }

        if event.is_readable() || event.is_read_closed() {
            if let Outcome::Closed(cause) = self.read_ready(cx) {
                return Outcome::Closed(cause);
            }
        }

        if event.is_writable() || !self.write_queue.is_empty() {
            return self.flush(cx);
        }
        Outcome::Open
    }

    fn finish_connect(&mut self, cx: &mut Cx<'_>) -> Result<bool, NetError> {
        let addr = self.socket.peer_addr();
        let failed = |source| NetError::Connect { addr, source };

        if let Some(err) = self.stream.take_error().map_err(failed)? {
            return Err(failed(err));
        }
        match self.stream.peer_addr() {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotConnected => return Ok(false),
            Err(err) => return Err(failed(err)),
        }

        self.connected = true;
        self.socket.shared().mark_connected();
        tracing::debug!(target: targets::TCP, id = %self.socket.id(), %addr, "connection established");
        self.notify(cx, "connection_opened", |observer, socket| {
            observer.connection_opened(socket)
        });
        Ok(true)
    }

    /// Read until the socket would block, then hand complete packets to the observer.
    fn read_ready(&mut self, cx: &mut Cx<'_>) -> Outcome {
        let mut eof = false;
        let mut failure = None;
        loop {
            match self.stream.read(&mut self.scratch) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    self.socket.shared().record_read(n);
                    self.read_buffer.extend_from_slice(&self.scratch[..n]);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        // Bytes that arrived before the failure are still delivered.
        if let Err(err) = self.deliver_packets(cx) {
            return Outcome::Closed(Some(err));
        }
        match failure {
            Some(err) => Outcome::Closed(Some(NetError::Io(err))),
            None if eof => Outcome::Closed(None),
            None => Outcome::Open,
        }
    }

    fn deliver_packets(&mut self, cx: &mut Cx<'_>) -> Result<(), NetError> {
        while self.socket.is_open() {
            let (reader, buffer) = (&mut self.reader, &mut self.read_buffer);
            let next = codec_call(cx.sink().as_ref(), "packet_reader", || {
                reader.next_packet(buffer)
            });
            let Some(packet) = next? else {
                break;
            };
            self.notify(cx, "packet_received", move |observer, socket| {
                observer.packet_received(socket, packet)
            });
        }
        Ok(())
    }

    /// Put a packet on the write queue and try to send it right away.
    pub(crate) fn enqueue(
        &mut self,
        cx: &mut Cx<'_>,
        packet: Vec<u8>,
        tag: Option<Tag>,
        reserved: usize,
        encode: bool,
    ) -> Outcome {
        let bytes = if encode {
            let writer = &mut self.writer;
            let encoded = codec_call(cx.sink().as_ref(), "packet_writer", || writer.write(packet));
            match encoded {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.socket.release(reserved);
                    return Outcome::Closed(Some(err.into()));
                }
            }
        } else {
            packet
        };

        self.write_queue.push_back(WriteEntry {
            bytes,
            written: 0,
            tag,
            reserved,
        });
        self.flush(cx)
    }

    /// Write queued entries until the socket would block, reporting each
    /// completed entry in FIFO order.
    fn flush(&mut self, cx: &mut Cx<'_>) -> Outcome {
        if !self.connected || !self.registered {
            return Outcome::Open;
        }

        while let Some(entry) = self.write_queue.front_mut() {
            while entry.written < entry.bytes.len() {
                match self.stream.write(&entry.bytes[entry.written..]) {
                    Ok(0) => {
                        return Outcome::Closed(Some(NetError::Io(io::ErrorKind::WriteZero.into())));
                    }
                    Ok(n) => {
                        entry.written += n;
                        self.socket.shared().record_written(n);
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Outcome::Open,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Outcome::Closed(Some(NetError::Io(err))),
                }
            }

            let Some(entry) = self.write_queue.pop_front() else {
                break;
            };
            self.socket.release(entry.reserved);
            let tag = entry.tag;
            self.notify(cx, "packet_sent", move |observer, socket| {
                observer.packet_sent(socket, tag)
            });
        }

        if self.close_after_write {
            return Outcome::Closed(None);
        }
        Outcome::Open
    }

    /// Close once the write queue is empty.
    pub(crate) fn close_after_write(&mut self, cx: &mut Cx<'_>) -> Outcome {
        self.close_after_write = true;
        if self.write_queue.is_empty() {
            return Outcome::Closed(None);
        }
        self.flush(cx)
    }

    /// Release the stream and report the connection as broken. Consumes the responder.
    pub(crate) fn shutdown(mut self, cx: &mut Cx<'_>, cause: Option<NetError>) {
        self.socket.shared().mark_closed();
        self.socket.shared().clear_queue();
        if self.registered {
            if let Err(error) = cx.registry().deregister(&mut self.stream) {
                tracing::trace!(target: targets::TCP, id = %self.socket.id(), %error, "deregister failed");
            }
        }

        match &cause {
            Some(error) => {
                tracing::debug!(target: targets::TCP, id = %self.socket.id(), %error, "connection broken")
            }
            None => tracing::debug!(target: targets::TCP, id = %self.socket.id(), "connection closed"),
        }
        self.notify(cx, "connection_broken", |observer, socket| {
            observer.connection_broken(socket, cause.as_ref())
        });
    }

    fn notify(
        &mut self,
        cx: &Cx<'_>,
        site: &'static str,
        f: impl FnOnce(&mut dyn SocketObserver, &dyn Connection),
    ) {
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        let socket = &self.socket;
        guarded(cx.sink().as_ref(), site, || f(observer.as_mut(), socket));
    }
}
