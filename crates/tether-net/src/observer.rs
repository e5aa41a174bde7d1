//! Event sinks for connections and listening sockets.
//!
//! Observers are called synchronously on the reactor thread. A panic inside
//! any of these methods is caught and sent to the reactor's exception sink;
//! it never reaches the reactor loop.

use crate::connection::{Connection, Tag};
use crate::error::NetError;
use crate::tcp::Socket;

/// Receives the events of one connection.
///
/// Every method has an empty default, so observers only implement what they use.
pub trait SocketObserver: Send {
    /// The connection is established and ready for traffic.
    fn connection_opened(&mut self, socket: &dyn Connection) {
        let _ = socket;
    }

    /// The connection is gone. `cause` is `None` for an orderly close.
    ///
    /// Called at most once, and nothing is called afterwards.
    fn connection_broken(&mut self, socket: &dyn Connection, cause: Option<&NetError>) {
        let _ = (socket, cause);
    }

    /// A complete packet arrived.
    fn packet_received(&mut self, socket: &dyn Connection, packet: Vec<u8>) {
        let _ = (socket, packet);
    }

    /// A packet has been completely written, in submission order.
    fn packet_sent(&mut self, socket: &dyn Connection, tag: Option<Tag>) {
        let _ = (socket, tag);
    }
}

/// Receives the events of a listening socket.
pub trait ServerSocketObserver: Send {
    /// A connection passed the admission policy. Call
    /// [`Connection::listen`] on it to start receiving its events.
    fn new_connection(&mut self, socket: Socket);

    /// Accepting a pending connection failed. The listener keeps running.
    fn accept_failed(&mut self, cause: &NetError) {
        let _ = cause;
    }

    /// The listening socket is closed. `cause` is `None` for an orderly close.
    fn server_socket_died(&mut self, cause: Option<&NetError>) {
        let _ = cause;
    }
}
