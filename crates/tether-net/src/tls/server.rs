//! Listening sockets that hand out TLS sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::ServerConfig;
use tether_core::logging::targets;

use super::TlsSocket;
use crate::connection::Connection;
use crate::error::{NetError, Result};
use crate::observer::ServerSocketObserver;
use crate::tcp::{ServerSocket, Socket};

/// Receives the events of a [`TlsServerSocket`].
pub trait TlsServerSocketObserver: Send {
    /// A connection was admitted and its server handshake has begun.
    fn new_connection(&mut self, socket: TlsSocket);

    /// Accepting or wrapping a pending connection failed.
    fn accept_failed(&mut self, cause: &NetError) {
        let _ = cause;
    }

    /// The listening socket is closed.
    fn server_socket_died(&mut self, cause: Option<&NetError>) {
        let _ = cause;
    }
}

/// A [`ServerSocket`] whose connections are wrapped in TLS as they arrive.
#[derive(Clone)]
pub struct TlsServerSocket {
    server: ServerSocket,
    config: Arc<ServerConfig>,
}

impl std::fmt::Debug for TlsServerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsServerSocket")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl TlsServerSocket {
    /// Serve TLS with `config` on `server`.
    pub fn new(server: ServerSocket, config: Arc<ServerConfig>) -> Self {
        Self { server, config }
    }

    /// The plain listener, for admission policy and counters.
    pub fn server(&self) -> &ServerSocket {
        &self.server
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Stop listening.
    pub fn close(&self) {
        self.server.close();
    }

    /// Register the observer and start accepting. Only the first call succeeds.
    pub fn listen(&self, observer: Box<dyn TlsServerSocketObserver>) -> Result<()> {
        self.server.listen(Box::new(TlsAcceptor {
            config: self.config.clone(),
            observer,
        }))
    }
}

struct TlsAcceptor {
    config: Arc<ServerConfig>,
    observer: Box<dyn TlsServerSocketObserver>,
}

impl TlsAcceptor {
    fn wrap(&self, socket: Socket) -> Result<TlsSocket> {
        let tls = TlsSocket::server(socket, self.config.clone())?;
        tls.begin_handshake()?;
        Ok(tls)
    }
}

impl ServerSocketObserver for TlsAcceptor {
    fn new_connection(&mut self, socket: Socket) {
        match self.wrap(socket.clone()) {
            Ok(tls) => self.observer.new_connection(tls),
            Err(err) => {
                tracing::warn!(target: targets::TLS, id = %socket.id(), error = %err, "failed to start TLS session");
                socket.close();
                self.observer.accept_failed(&err);
            }
        }
    }

    fn accept_failed(&mut self, cause: &NetError) {
        self.observer.accept_failed(cause);
    }

    fn server_socket_died(&mut self, cause: Option<&NetError>) {
        self.observer.server_socket_died(cause);
    }
}
