//! The reactor's registry of live connections and listeners.

use std::collections::HashMap;

use mio::Token;
use mio::event::Event;
use tether_core::logging::targets;
use tether_core::sink::guarded;
use tether_core::{Dispatch, LoopContext, LoopHandle};

use super::connection::Socket;
use super::responder::{ConnectionResponder, Outcome};
use super::server::{ServerResponder, ServerSocket};
use crate::error::NetError;
use crate::observer::{ServerSocketObserver, SocketObserver};
use crate::packet::{PacketReader, PacketWriter};

/// Handle to a reactor whose dispatch state is a [`Responders`] registry.
pub(crate) type ReactorHandle = LoopHandle<Responders>;

type Cx<'a> = LoopContext<'a, Responders>;

/// Every connection and listener owned by one reactor, keyed by token.
///
/// Only touched on the reactor thread; handles reach it through queued actions.
#[derive(Default)]
pub struct Responders {
    connections: HashMap<Token, ConnectionResponder>,
    servers: HashMap<Token, ServerResponder>,
}

impl std::fmt::Debug for Responders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responders")
            .field("connections", &self.connections.len())
            .field("servers", &self.servers.len())
            .finish()
    }
}

impl Responders {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live listeners.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub(crate) fn insert_connection(&mut self, responder: ConnectionResponder) {
        self.connections.insert(responder.token(), responder);
    }

    pub(crate) fn insert_server(&mut self, responder: ServerResponder) {
        self.servers.insert(responder.server().token(), responder);
    }

    pub(crate) fn enqueue(
        &mut self,
        cx: &mut Cx<'_>,
        token: Token,
        packet: Vec<u8>,
        tag: Option<crate::connection::Tag>,
        reserved: usize,
        encode: bool,
    ) {
        let Some(responder) = self.connections.get_mut(&token) else {
            tracing::trace!(target: targets::TCP, ?token, "write for a closed connection dropped");
            return;
        };
        let outcome = responder.enqueue(cx, packet, tag, reserved, encode);
        self.settle(cx, token, outcome);
    }

    pub(crate) fn close(&mut self, cx: &mut Cx<'_>, token: Token, cause: Option<NetError>) {
        if let Some(responder) = self.connections.remove(&token) {
            responder.shutdown(cx, cause);
        }
    }

    pub(crate) fn close_after_write(&mut self, cx: &mut Cx<'_>, token: Token) {
        let Some(responder) = self.connections.get_mut(&token) else {
            return;
        };
        let outcome = responder.close_after_write(cx);
        self.settle(cx, token, outcome);
    }

    pub(crate) fn listen(
        &mut self,
        cx: &mut Cx<'_>,
        socket: Socket,
        mut observer: Box<dyn SocketObserver>,
    ) {
        let token = socket.token();
        let Some(responder) = self.connections.get_mut(&token) else {
            guarded(cx.sink().as_ref(), "connection_broken", || {
                observer.connection_broken(&socket, None)
            });
            return;
        };
        let outcome = responder.attach(cx, observer);
        self.settle(cx, token, outcome);
    }

    pub(crate) fn set_packet_reader(&mut self, token: Token, reader: Box<dyn PacketReader>) {
        if let Some(responder) = self.connections.get_mut(&token) {
            responder.set_packet_reader(reader);
        }
    }

    pub(crate) fn set_packet_writer(&mut self, token: Token, writer: Box<dyn PacketWriter>) {
        if let Some(responder) = self.connections.get_mut(&token) {
            responder.set_packet_writer(writer);
        }
    }

    pub(crate) fn listen_server(
        &mut self,
        cx: &mut Cx<'_>,
        server: ServerSocket,
        mut observer: Box<dyn ServerSocketObserver>,
    ) {
        let token = server.token();
        let Some(responder) = self.servers.get_mut(&token) else {
            guarded(cx.sink().as_ref(), "server_socket_died", || {
                observer.server_socket_died(None)
            });
            return;
        };
        if let Err(err) = responder.attach(cx, observer) {
            self.close_server(cx, token, Some(err));
        }
    }

    pub(crate) fn close_server(&mut self, cx: &mut Cx<'_>, token: Token, cause: Option<NetError>) {
        if let Some(responder) = self.servers.remove(&token) {
            responder.shutdown(cx, cause);
        }
    }

    fn settle(&mut self, cx: &mut Cx<'_>, token: Token, outcome: Outcome) {
        if let Outcome::Closed(cause) = outcome {
            self.close(cx, token, cause);
        }
    }
}

impl Dispatch for Responders {
    fn dispatch(&mut self, cx: &mut Cx<'_>, event: &Event) {
        let token = event.token();
        if let Some(responder) = self.connections.get_mut(&token) {
            let outcome = responder.ready(cx, event);
            self.settle(cx, token, outcome);
            return;
        }
        if let Some(server) = self.servers.get_mut(&token) {
            for responder in server.accept_ready(cx) {
                self.insert_connection(responder);
            }
            return;
        }
        tracing::trace!(target: targets::TCP, ?token, "event for unknown token");
    }

    fn shutdown(&mut self, cx: &mut Cx<'_>) {
        tracing::debug!(
            target: targets::TCP,
            connections = self.connections.len(),
            servers = self.servers.len(),
            "closing all sockets"
        );
        for (_, responder) in self.connections.drain() {
            responder.shutdown(cx, None);
        }
        for (_, responder) in self.servers.drain() {
            responder.shutdown(cx, None);
        }
    }
}
