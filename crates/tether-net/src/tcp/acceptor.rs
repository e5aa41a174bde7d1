//! Admission policies for listening sockets.

use std::net::SocketAddr;
use std::sync::Arc;

/// Decides whether an inbound connection is accepted.
///
/// Called on the reactor thread for every pending connection. A rejected
/// connection is closed at once; the listener's observer never hears of it.
pub trait ConnectionAcceptor: Send + Sync {
    /// Return `true` to accept a connection from `addr`.
    fn accept_connection(&self, addr: &SocketAddr) -> bool;
}

impl<F> ConnectionAcceptor for F
where
    F: Fn(&SocketAddr) -> bool + Send + Sync,
{
    fn accept_connection(&self, addr: &SocketAddr) -> bool {
        self(addr)
    }
}

/// Accepts every connection. The default policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ConnectionAcceptor for AllowAll {
    fn accept_connection(&self, _addr: &SocketAddr) -> bool {
        true
    }
}

/// Rejects every connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl ConnectionAcceptor for DenyAll {
    fn accept_connection(&self, _addr: &SocketAddr) -> bool {
        false
    }
}

/// Accepts loopback peers only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackOnly;

impl ConnectionAcceptor for LoopbackOnly {
    fn accept_connection(&self, addr: &SocketAddr) -> bool {
        addr.ip().is_loopback()
    }
}

/// Shared policy reference as stored by a listener.
pub type SharedAcceptor = Arc<dyn ConnectionAcceptor>;
