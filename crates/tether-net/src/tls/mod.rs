//! A non-blocking TLS layer over any [`Socket`](crate::tcp::Socket).
//!
//! [`TlsSocket`] sits between a TCP socket and the application. Towards the
//! socket it is an observer receiving raw records; towards the application it
//! is a plain [`Connection`](crate::Connection) carrying decrypted packets.
//! The handshake runs on the reactor thread, driven by the records that
//! arrive, and never blocks it.
//!
//! ```ignore
//! use tether_net::tls::{TlsConfig, TlsSocket};
//!
//! let config = TlsConfig::new().build_client_config()?;
//! let socket = handle.open_tls_socket(addr, config, "example.com")?;
//! socket.listen(Box::new(MyObserver))?;
//! socket.begin_handshake()?;
//! socket.write(b"hello".to_vec());
//! ```

mod config;
mod engine;
mod interceptor;
mod server;

pub use config::{AlpnProtocol, Certificate, Identity, TlsConfig, TlsVersion};
pub use engine::{EngineResult, EngineStatus, RustlsEngine, TlsEngine};
pub use interceptor::TlsSocket;
pub use server::{TlsServerSocket, TlsServerSocketObserver};

use crate::tcp::StateByte;

/// Progress of a TLS session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum HandshakeState {
    /// No handshake yet; traffic passes through unencrypted.
    #[default]
    NotStarted = 0,
    /// Handshake records are being exchanged. Application writes are held.
    Handshaking = 1,
    /// Application data is encrypted.
    Established = 2,
    /// The engine failed. The connection is closed.
    Failed = 3,
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Established => write!(f, "Established"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl StateByte for HandshakeState {
    fn to_byte(self) -> u8 {
        self as u8
    }

    fn from_byte(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Handshaking,
            2 => Self::Established,
            _ => Self::Failed,
        }
    }
}
