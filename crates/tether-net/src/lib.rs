//! Networking for Tether.
//!
//! This crate layers packet-oriented sockets over the `tether-core` reactor:
//!
//! - **TCP**: outbound [`Socket`]s and listening [`ServerSocket`]s with
//!   backpressured, FIFO write queues
//! - **Packets**: a pluggable codec boundary ([`packet`]) deciding where one
//!   packet ends and the next begins
//! - **TLS**: [`TlsSocket`], a non-blocking handshake and record layer that
//!   wraps any socket
//!
//! Every socket is owned by one reactor thread. Handles are `Send + Sync`;
//! their methods never block and either touch atomics or queue work on the
//! reactor. Events arrive through [`SocketObserver`] and
//! [`ServerSocketObserver`], called on the reactor thread.
//!
//! # Echo server
//!
//! ```no_run
//! use tether_net::{Connection, NetConfig, NetService, ServerSocketObserver, Socket, SocketObserver};
//!
//! struct Echo;
//!
//! impl SocketObserver for Echo {
//!     fn packet_received(&mut self, socket: &dyn Connection, packet: Vec<u8>) {
//!         socket.write(packet);
//!     }
//! }
//!
//! struct Accept;
//!
//! impl ServerSocketObserver for Accept {
//!     fn new_connection(&mut self, socket: Socket) {
//!         let _ = socket.listen(Box::new(Echo));
//!     }
//! }
//!
//! # fn main() -> tether_net::Result<()> {
//! let mut service = NetService::new(NetConfig::default())?;
//! let server = service.open_server_socket("127.0.0.1:7000".parse().unwrap())?;
//! server.listen(Box::new(Accept))?;
//! service.run()
//! # }
//! ```
//!
//! # Backpressure
//!
//! [`Connection::write`] returns `false` instead of blocking when the write
//! queue would grow past [`Connection::max_queue_size`]. Producers pause and
//! resume from [`SocketObserver::packet_sent`].

mod connection;
mod error;
mod observer;
pub mod packet;
mod service;
pub mod tcp;
pub mod tls;

pub use connection::{Connection, Tag};
pub use error::{NetError, Result, TlsError};
pub use observer::{ServerSocketObserver, SocketObserver};
pub use service::{NetConfig, NetHandle, NetService};
pub use tcp::{ConnectionId, ServerSocket, Socket, SocketState, TcpSocketConfig};
pub use tls::{HandshakeState, TlsServerSocket, TlsSocket};

pub use tether_core::{ExceptionSink, LoggingSink, LoopConfig, SharedSink};

static_assertions::assert_impl_all!(Socket: Send, Sync, Clone);
static_assertions::assert_impl_all!(ServerSocket: Send, Sync, Clone);
static_assertions::assert_impl_all!(TlsSocket: Send, Sync, Clone);
static_assertions::assert_impl_all!(NetHandle: Send, Sync, Clone);
