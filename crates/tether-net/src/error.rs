//! Error types for the networking module.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tether_core::ReactorError;

use crate::packet::ProtocolError;
use crate::tls::HandshakeState;

/// Network-specific errors.
#[derive(Debug)]
pub enum NetError {
    /// Reading from or writing to a connection failed.
    Io(io::Error),
    /// Binding a listening socket failed.
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying error.
        source: io::Error,
    },
    /// An outbound connection could not be established.
    Connect {
        /// The address being connected to.
        addr: SocketAddr,
        /// The underlying error.
        source: io::Error,
    },
    /// Accepting a pending connection failed.
    Accept(io::Error),
    /// The packet codec rejected the byte stream or a packet.
    Protocol(ProtocolError),
    /// The TLS engine failed.
    Tls(TlsError),
    /// An observer is already registered on this socket.
    ObserverAlreadySet,
    /// A TLS handshake is already in progress.
    HandshakeInProgress,
    /// The TLS handshake cannot start from this state.
    InvalidHandshakeState(HandshakeState),
    /// The reactor is no longer running.
    Reactor(ReactorError),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Bind { addr, source } => write!(f, "Failed to bind {addr}: {source}"),
            Self::Connect { addr, source } => write!(f, "Failed to connect to {addr}: {source}"),
            Self::Accept(err) => write!(f, "Failed to accept connection: {err}"),
            Self::Protocol(err) => write!(f, "Protocol error: {err}"),
            Self::Tls(err) => write!(f, "TLS error: {err}"),
            Self::ObserverAlreadySet => write!(f, "An observer is already listening on this socket"),
            Self::HandshakeInProgress => write!(f, "A TLS handshake is already in progress"),
            Self::InvalidHandshakeState(state) => {
                write!(f, "Cannot begin a TLS handshake in state {state}")
            }
            Self::Reactor(err) => write!(f, "Reactor error: {err}"),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) | Self::Accept(err) => Some(err),
            Self::Bind { source, .. } | Self::Connect { source, .. } => Some(source),
            Self::Protocol(err) => Some(err),
            Self::Tls(err) => Some(err),
            Self::Reactor(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ProtocolError> for NetError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<TlsError> for NetError {
    fn from(err: TlsError) -> Self {
        Self::Tls(err)
    }
}

impl From<ReactorError> for NetError {
    fn from(err: ReactorError) -> Self {
        Self::Reactor(err)
    }
}

/// TLS-specific errors.
#[derive(Debug)]
pub enum TlsError {
    /// The peer violated the protocol or sent a fatal alert.
    Protocol(rustls::Error),
    /// The engine's record buffers failed.
    Io(io::Error),
    /// The engine closed before the handshake completed.
    Closed,
    /// Certificate, key or configuration material was rejected.
    Config(String),
    /// The name to verify the server against is not a valid DNS name or IP.
    InvalidServerName(String),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "record I/O failed: {err}"),
            Self::Closed => write!(f, "engine closed during handshake"),
            Self::Config(msg) => write!(f, "{msg}"),
            Self::InvalidServerName(name) => write!(f, "invalid server name '{name}'"),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        Self::Protocol(err)
    }
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_address() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = NetError::Connect {
            addr,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().starts_with("Failed to connect to 127.0.0.1:9"));
    }

    #[test]
    fn test_tls_error_source_chain() {
        use std::error::Error;

        let err = NetError::from(TlsError::Protocol(rustls::Error::DecryptError));
        let tls = err.source().unwrap();
        assert!(tls.source().is_some());
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: NetError = ProtocolError::PacketTooLarge { size: 10, max: 4 }.into();
        assert!(matches!(err, NetError::Protocol(_)));
    }
}
