//! Listening sockets: the application handle and the reactor-side responder.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mio::net::TcpListener;
use mio::{Interest, Token};
use parking_lot::{Mutex, RwLock};
use tether_core::LoopContext;
use tether_core::logging::targets;
use tether_core::sink::guarded;

use super::acceptor::{AllowAll, DenyAll, SharedAcceptor};
use super::config::TcpSocketConfig;
use super::responder::ConnectionResponder;
use super::responders::{ReactorHandle, Responders};
use super::state::{AtomicState, ServerState};
use crate::connection::{Connection, Tag};
use crate::error::{NetError, Result};
use crate::observer::ServerSocketObserver;

struct ServerShared {
    token: Token,
    local_addr: SocketAddr,
    state: AtomicState<ServerState>,
    observer_set: AtomicBool,
    acceptor: RwLock<SharedAcceptor>,
    accepted: AtomicU64,
    refused: AtomicU64,
    failed: AtomicU64,
    tag: Mutex<Option<Tag>>,
}

/// Handle to a listening TCP socket owned by the reactor.
#[derive(Clone)]
pub struct ServerSocket {
    shared: Arc<ServerShared>,
    reactor: ReactorHandle,
}

impl std::fmt::Debug for ServerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSocket")
            .field("local_addr", &self.shared.local_addr)
            .field("state", &self.state())
            .field("accepted", &self.total_accepted())
            .finish()
    }
}

impl ServerSocket {
    fn new(reactor: ReactorHandle, token: Token, local_addr: SocketAddr) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                token,
                local_addr,
                state: AtomicState::new(ServerState::Bound),
                observer_set: AtomicBool::new(false),
                acceptor: RwLock::new(Arc::new(AllowAll)),
                accepted: AtomicU64::new(0),
                refused: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                tag: Mutex::new(None),
            }),
            reactor,
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.shared.token
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Current listener state.
    pub fn state(&self) -> ServerState {
        self.shared.state.load()
    }

    /// Whether the listener has not been closed yet.
    pub fn is_open(&self) -> bool {
        self.state() != ServerState::Closed
    }

    /// Replace the admission policy. Takes effect for the next accept.
    ///
    /// `None` installs [`DenyAll`]. A listener that never had a policy set
    /// accepts everything.
    pub fn set_connection_acceptor(&self, acceptor: Option<SharedAcceptor>) {
        *self.shared.acceptor.write() = acceptor.unwrap_or_else(|| Arc::new(DenyAll));
    }

    /// The current admission policy.
    pub fn connection_acceptor(&self) -> SharedAcceptor {
        self.shared.acceptor.read().clone()
    }

    /// Register the observer and start accepting. Only the first call succeeds.
    ///
    /// If the listener is closed before the registration is processed, the
    /// observer receives `server_socket_died` with no cause.
    pub fn listen(&self, observer: Box<dyn ServerSocketObserver>) -> Result<()> {
        if self.shared.observer_set.swap(true, Ordering::AcqRel) {
            return Err(NetError::ObserverAlreadySet);
        }
        let server = self.clone();
        self.reactor
            .queue_with(move |responders, cx| responders.listen_server(cx, server, observer))?;
        Ok(())
    }

    /// Stop listening. Idempotent; safe from any thread.
    pub fn close(&self) {
        if self.shared.state.swap(ServerState::Closed) == ServerState::Closed {
            return;
        }
        let token = self.token();
        let _ = self
            .reactor
            .queue_with(move |responders, cx| responders.close_server(cx, token, None));
    }

    /// Connections accepted by the admission policy.
    pub fn total_accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Connections rejected by the admission policy.
    pub fn total_refused(&self) -> u64 {
        self.shared.refused.load(Ordering::Relaxed)
    }

    /// Accept attempts that failed with an error.
    pub fn total_failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// All connection attempts seen: accepted, refused and failed.
    pub fn total_connections(&self) -> u64 {
        self.total_accepted() + self.total_refused() + self.total_failed()
    }

    /// The application's tag for this listener.
    pub fn tag(&self) -> Option<Tag> {
        self.shared.tag.lock().clone()
    }

    /// Attach an application value to this listener.
    pub fn set_tag(&self, tag: Option<Tag>) {
        *self.shared.tag.lock() = tag;
    }
}

/// Owns a listening socket. Lives on the reactor thread.
pub(crate) struct ServerResponder {
    server: ServerSocket,
    listener: TcpListener,
    observer: Option<Box<dyn ServerSocketObserver>>,
    socket_config: TcpSocketConfig,
    registered: bool,
}

impl ServerResponder {
    /// Bind `addr` and build the responder with its handle.
    pub(crate) fn bind(
        reactor: &ReactorHandle,
        addr: SocketAddr,
        socket_config: TcpSocketConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| NetError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            server: ServerSocket::new(reactor.clone(), reactor.next_token(), local_addr),
            listener,
            observer: None,
            socket_config,
            registered: false,
        })
    }

    pub(crate) fn server(&self) -> &ServerSocket {
        &self.server
    }

    /// Install the observer and register for accept readiness.
    pub(crate) fn attach(
        &mut self,
        cx: &mut LoopContext<'_, Responders>,
        observer: Box<dyn ServerSocketObserver>,
    ) -> Result<()> {
        self.observer = Some(observer);
        cx.registry()
            .register(&mut self.listener, self.server.token(), Interest::READABLE)?;
        self.registered = true;
        let _ = self
            .server
            .shared
            .state
            .transition(ServerState::Listening, |s| s == ServerState::Bound);
        tracing::debug!(target: targets::SERVER, addr = %self.server.local_addr(), "listening");
        Ok(())
    }

    /// Accept every pending connection.
    ///
    /// Readiness is edge-triggered, so the backlog is drained until the
    /// listener would block. Admitted connections are returned for the
    /// registry to own; the observer has already been told about them.
    pub(crate) fn accept_ready(
        &mut self,
        cx: &mut LoopContext<'_, Responders>,
    ) -> Vec<ConnectionResponder> {
        let sink = cx.sink().as_ref();
        let shared = &self.server.shared;
        let mut admitted = Vec::new();

        while self.server.is_open() {
            let (stream, addr) = match self.listener.accept() {
                Ok(pending) => pending,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue;
                }
                Err(err) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(target: targets::SERVER, error = %err, "accept failed");
                    let cause = NetError::Accept(err);
                    if let Some(observer) = self.observer.as_mut() {
                        guarded(sink, "accept_failed", || observer.accept_failed(&cause));
                    }
                    break;
                }
            };

            let acceptor = shared.acceptor.read().clone();
            let admit = guarded(sink, "accept_connection", || acceptor.accept_connection(&addr))
                .unwrap_or(false);
            if !admit {
                shared.refused.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target: targets::SERVER, %addr, "connection refused by policy");
                drop(stream);
                continue;
            }

            shared.accepted.fetch_add(1, Ordering::Relaxed);
            let responder =
                ConnectionResponder::accepted(cx.handle(), stream, addr, &self.socket_config);
            let socket = responder.socket().clone();
            admitted.push(responder);
            tracing::debug!(target: targets::SERVER, id = %socket.id(), %addr, "connection accepted");

            let delivered = match self.observer.as_mut() {
                Some(observer) => {
                    let handed = socket.clone();
                    guarded(sink, "new_connection", || observer.new_connection(handed)).is_some()
                }
                None => false,
            };
            if !delivered {
                socket.close();
            }
        }
        admitted
    }

    /// Release the listener and report it as dead. Consumes the responder.
    pub(crate) fn shutdown(mut self, cx: &mut LoopContext<'_, Responders>, cause: Option<NetError>) {
        self.server.shared.state.swap(ServerState::Closed);
        if self.registered {
            if let Err(error) = cx.registry().deregister(&mut self.listener) {
                tracing::trace!(target: targets::SERVER, %error, "deregister failed");
            }
        }
        tracing::debug!(target: targets::SERVER, addr = %self.server.local_addr(), "listener closed");

        if let Some(observer) = self.observer.as_mut() {
            guarded(cx.sink().as_ref(), "server_socket_died", || {
                observer.server_socket_died(cause.as_ref())
            });
        }
    }
}
