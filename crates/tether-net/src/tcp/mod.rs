//! Non-blocking TCP connections and listeners driven by the reactor.
//!
//! [`Socket`] and [`ServerSocket`] are thread-safe handles. The sockets
//! themselves live in the reactor's [`Responders`] registry and are only
//! touched on the reactor thread.

mod acceptor;
mod config;
mod connection;
mod responder;
mod responders;
mod server;
mod state;

pub use acceptor::{AllowAll, ConnectionAcceptor, DenyAll, LoopbackOnly, SharedAcceptor};
pub use config::TcpSocketConfig;
pub use connection::{ConnectionId, Socket};
pub use responders::Responders;
pub use server::ServerSocket;
pub use state::{ServerState, SocketState};

pub(crate) use responder::ConnectionResponder;
pub(crate) use responders::ReactorHandle;
pub(crate) use server::ServerResponder;
pub(crate) use state::{AtomicState, StateByte};
