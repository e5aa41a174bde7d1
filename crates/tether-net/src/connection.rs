//! Connection operations shared by plain and TLS sockets.

use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::observer::SocketObserver;
use crate::packet::{PacketReader, PacketWriter};
use crate::tcp::ConnectionId;

/// Opaque value attached to a socket or to a single write.
///
/// A tag passed to [`Connection::write_tagged`] comes back unchanged in
/// [`SocketObserver::packet_sent`] once that packet has fully left the socket.
pub type Tag = Arc<dyn Any + Send + Sync>;

/// Everything an application can do with a connection, from any thread.
///
/// Implemented by [`Socket`](crate::tcp::Socket) and
/// [`TlsSocket`](crate::tls::TlsSocket). Methods either touch atomics
/// directly or schedule work on the reactor; none of them block.
pub trait Connection: Send + Sync {
    /// Identifier of the underlying connection.
    fn id(&self) -> ConnectionId;

    /// Remote address.
    fn peer_addr(&self) -> SocketAddr;

    /// Remote IP address.
    fn ip(&self) -> IpAddr {
        self.peer_addr().ip()
    }

    /// Remote port.
    fn port(&self) -> u16 {
        self.peer_addr().port()
    }

    /// Whether the connection has not been closed yet.
    fn is_open(&self) -> bool;

    /// Queue a packet for sending.
    ///
    /// Returns `false` when the connection is closed or closing, or when the
    /// packet would push the write queue past [`max_queue_size`](Self::max_queue_size).
    /// A rejected packet is not queued at all.
    fn write(&self, packet: Vec<u8>) -> bool {
        self.write_tagged(packet, None)
    }

    /// Queue a packet, reporting `tag` back through `packet_sent` once it is written.
    fn write_tagged(&self, packet: Vec<u8>, tag: Option<Tag>) -> bool;

    /// Close immediately. Idempotent; safe from any thread.
    fn close(&self);

    /// Stop accepting writes and close once everything queued has been sent.
    fn close_after_write(&self);

    /// Register the observer. Only the first call succeeds.
    ///
    /// Registration happens on the reactor thread. If the connection is already
    /// gone by then, the observer receives `connection_broken` with no cause.
    fn listen(&self, observer: Box<dyn SocketObserver>) -> Result<()>;

    /// Replace the packet reader for subsequent reads.
    fn set_packet_reader(&self, reader: Box<dyn PacketReader>);

    /// Replace the packet writer for subsequent writes.
    fn set_packet_writer(&self, writer: Box<dyn PacketWriter>);

    /// Bytes read from the network so far.
    fn bytes_read(&self) -> u64;

    /// Bytes written to the network so far.
    fn bytes_written(&self) -> u64;

    /// Time since the connection was created.
    fn time_open(&self) -> Duration;

    /// Bytes of accepted packets not yet fully written.
    fn write_queue_size(&self) -> usize;

    /// Write queue limit in bytes. `None` is unlimited.
    fn max_queue_size(&self) -> Option<usize>;

    /// Set the write queue limit in bytes.
    fn set_max_queue_size(&self, max: Option<usize>);

    /// The application's tag for this connection.
    fn tag(&self) -> Option<Tag>;

    /// Attach an application value to this connection.
    fn set_tag(&self, tag: Option<Tag>);

    /// Run `action` on the reactor thread.
    fn queue(&self, action: Box<dyn FnOnce() + Send>) -> Result<()>;
}
