//! The entry point: a reactor plus the calls that create sockets on it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::net::TcpStream;
use rustls::{ClientConfig, ServerConfig};
use tether_core::logging::targets;
use tether_core::{EventLoop, LoggingSink, LoopConfig, SharedSink};

use crate::error::{NetError, Result};
use crate::tcp::{
    ConnectionResponder, ReactorHandle, Responders, ServerResponder, ServerSocket, Socket,
    TcpSocketConfig,
};
use crate::tls::{TlsServerSocket, TlsSocket};

/// Settings for a [`NetService`].
#[derive(Clone, Debug, Default)]
pub struct NetConfig {
    /// Reactor loop settings.
    pub event_loop: LoopConfig,
    /// Defaults applied to every new connection.
    pub socket: TcpSocketConfig,
}

impl NetConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reactor loop settings.
    pub fn event_loop(mut self, config: LoopConfig) -> Self {
        self.event_loop = config;
        self
    }

    /// Set the per-connection defaults.
    pub fn socket(mut self, config: TcpSocketConfig) -> Self {
        self.socket = config;
        self
    }
}

/// Opens sockets on a running reactor. Cheap to clone; usable from any thread.
#[derive(Clone, Debug)]
pub struct NetHandle {
    reactor: ReactorHandle,
    socket_config: Arc<TcpSocketConfig>,
}

impl NetHandle {
    /// Start a non-blocking connect to `addr`.
    ///
    /// The returned socket accepts writes at once; they are sent when the
    /// connection completes. Call [`Connection::listen`](crate::Connection::listen)
    /// to learn the outcome.
    pub fn open_socket(&self, addr: SocketAddr) -> Result<Socket> {
        let stream = TcpStream::connect(addr).map_err(|source| NetError::Connect { addr, source })?;
        let responder = ConnectionResponder::outbound(&self.reactor, stream, addr, &self.socket_config);
        let socket = responder.socket().clone();
        self.reactor
            .queue_with(move |responders, _cx| responders.insert_connection(responder))?;
        tracing::debug!(target: targets::TCP, %addr, "connecting");
        Ok(socket)
    }

    /// Bind a listening socket. Call [`ServerSocket::listen`] to start accepting.
    pub fn open_server_socket(&self, addr: SocketAddr) -> Result<ServerSocket> {
        let responder = ServerResponder::bind(&self.reactor, addr, (*self.socket_config).clone())?;
        let server = responder.server().clone();
        self.reactor
            .queue_with(move |responders, _cx| responders.insert_server(responder))?;
        Ok(server)
    }

    /// Connect to `addr` and wrap the connection as a TLS client for `server_name`.
    ///
    /// The handshake starts when [`TlsSocket::begin_handshake`] is called.
    pub fn open_tls_socket(
        &self,
        addr: SocketAddr,
        config: Arc<ClientConfig>,
        server_name: &str,
    ) -> Result<TlsSocket> {
        let socket = self.open_socket(addr)?;
        match TlsSocket::client(socket.clone(), config, server_name) {
            Ok(tls) => Ok(tls),
            Err(err) => {
                crate::Connection::close(&socket);
                Err(err)
            }
        }
    }

    /// Bind a listening socket that serves TLS with `config`.
    pub fn open_tls_server_socket(
        &self,
        addr: SocketAddr,
        config: Arc<ServerConfig>,
    ) -> Result<TlsServerSocket> {
        Ok(TlsServerSocket::new(self.open_server_socket(addr)?, config))
    }

    /// Run `action` once on the reactor thread.
    pub fn queue(&self, action: impl FnOnce() + Send + 'static) -> Result<()> {
        self.reactor.queue(action)?;
        Ok(())
    }

    /// Close every socket and stop the reactor.
    pub fn stop(&self) {
        self.reactor.stop();
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.reactor.is_stopping()
    }

    /// Whether the reactor loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.reactor.is_stopped()
    }

    /// Whether the caller runs on the reactor thread.
    pub fn is_loop_thread(&self) -> bool {
        self.reactor.is_loop_thread()
    }

    /// The exception sink shared by every socket on this reactor.
    pub fn sink(&self) -> &SharedSink {
        self.reactor.sink()
    }
}

/// A reactor together with its socket registry.
///
/// ```no_run
/// use tether_net::{NetConfig, NetService};
///
/// # fn main() -> tether_net::Result<()> {
/// let service = NetService::new(NetConfig::default())?;
/// let handle = service.handle();
/// let reactor = service.spawn()?;
///
/// let server = handle.open_server_socket("127.0.0.1:0".parse().unwrap())?;
/// println!("listening on {}", server.local_addr());
///
/// handle.stop();
/// let _ = reactor.join();
/// # Ok(())
/// # }
/// ```
pub struct NetService {
    event_loop: EventLoop<Responders>,
    handle: NetHandle,
}

impl std::fmt::Debug for NetService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetService")
            .field("responders", self.event_loop.state())
            .finish()
    }
}

impl NetService {
    /// Create a service that logs uncaught errors.
    pub fn new(config: NetConfig) -> Result<Self> {
        Self::with_sink(config, LoggingSink::shared())
    }

    /// Create a service reporting uncaught errors to `sink`.
    pub fn with_sink(config: NetConfig, sink: SharedSink) -> Result<Self> {
        let event_loop = EventLoop::new(Responders::new(), config.event_loop, sink)?;
        let handle = NetHandle {
            reactor: event_loop.handle(),
            socket_config: Arc::new(config.socket),
        };
        Ok(Self { event_loop, handle })
    }

    /// A handle for opening sockets from any thread.
    pub fn handle(&self) -> NetHandle {
        self.handle.clone()
    }

    /// Run the reactor on the calling thread until [`NetHandle::stop`].
    pub fn run(&mut self) -> Result<()> {
        self.event_loop.run()?;
        Ok(())
    }

    /// Run a single reactor cycle on the calling thread.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        Ok(self.event_loop.run_once(timeout)?)
    }

    /// Run the reactor on its own thread.
    pub fn spawn(self) -> Result<JoinHandle<tether_core::Result<()>>> {
        Ok(self.event_loop.spawn()?)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.event_loop.state().connection_count()
    }

    /// Number of live listeners.
    pub fn server_count(&self) -> usize {
        self.event_loop.state().server_count()
    }

    /// See [`NetHandle::open_socket`].
    pub fn open_socket(&self, addr: SocketAddr) -> Result<Socket> {
        self.handle.open_socket(addr)
    }

    /// See [`NetHandle::open_server_socket`].
    pub fn open_server_socket(&self, addr: SocketAddr) -> Result<ServerSocket> {
        self.handle.open_server_socket(addr)
    }
}
