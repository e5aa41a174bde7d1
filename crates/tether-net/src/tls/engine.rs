//! The TLS engine boundary and its rustls implementation.

use std::io::{Read, Write};
use std::sync::Arc;

use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;

use crate::error::TlsError;

/// What the engine needs next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    /// Records are ready to be sent; call [`TlsEngine::wrap`].
    NeedsWrap,
    /// More records from the peer are needed; feed them to [`TlsEngine::unwrap`].
    NeedsUnwrap,
    /// A delegated task must run before the handshake can go on.
    NeedsTask,
    /// The handshake is complete and nothing is pending.
    Complete,
    /// The session is closed in at least one direction.
    Closed,
}

/// Output of one wrap or unwrap call.
#[derive(Debug)]
pub struct EngineResult {
    /// Records to send (wrap) or decrypted plaintext (unwrap).
    pub bytes: Vec<u8>,
    /// Engine status after the call.
    pub status: EngineStatus,
}

/// A non-blocking handshake and record engine.
///
/// Engines never touch a socket. Records produced by [`wrap`](Self::wrap) are
/// queued on the connection by the caller; records received from the peer are
/// handed to [`unwrap`](Self::unwrap).
pub trait TlsEngine: Send {
    /// Whether this engine plays the client role.
    fn is_client(&self) -> bool;

    /// Start the handshake.
    fn begin_handshake(&mut self) -> Result<(), TlsError>;

    /// Encrypt `plaintext`. An empty slice flushes pending handshake or
    /// control records.
    fn wrap(&mut self, plaintext: &[u8]) -> Result<EngineResult, TlsError>;

    /// Process records received from the peer.
    fn unwrap(&mut self, records: &[u8]) -> Result<EngineResult, TlsError>;

    /// Queue a close-notify. The next [`wrap`](Self::wrap) returns it.
    fn close_outbound(&mut self);

    /// What the engine needs next.
    fn status(&self) -> EngineStatus;

    /// Whether the handshake is still running.
    fn is_handshaking(&self) -> bool;

    /// Run a pending delegated task to completion.
    fn run_delegated_task(&mut self) -> Result<(), TlsError> {
        Ok(())
    }
}

/// [`TlsEngine`] backed by a [`rustls::Connection`].
pub struct RustlsEngine {
    conn: Connection,
    started: bool,
    outbound_closed: bool,
    peer_closed: bool,
}

impl std::fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("client", &self.is_client())
            .field("started", &self.started)
            .field("status", &self.status())
            .finish()
    }
}

impl RustlsEngine {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            started: false,
            outbound_closed: false,
            peer_closed: false,
        }
    }

    /// A client engine verifying the server as `server_name`.
    pub fn client(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Result<Self, TlsError> {
        let conn = ClientConnection::new(config, server_name)?;
        Ok(Self::new(conn.into()))
    }

    /// A client engine for a host name or IP literal.
    pub fn client_for_host(config: Arc<ClientConfig>, host: &str) -> Result<Self, TlsError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TlsError::InvalidServerName(host.to_string()))?;
        Self::client(config, server_name)
    }

    /// A server engine.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config)?;
        Ok(Self::new(conn.into()))
    }

    /// Move every pending record into `out`.
    fn drain_records(&mut self, out: &mut Vec<u8>) -> Result<(), TlsError> {
        while self.conn.wants_write() {
            self.conn.write_tls(out).map_err(TlsError::Io)?;
        }
        Ok(())
    }
}

impl TlsEngine for RustlsEngine {
    fn is_client(&self) -> bool {
        matches!(self.conn, Connection::Client(_))
    }

    fn begin_handshake(&mut self) -> Result<(), TlsError> {
        // rustls queues the ClientHello on construction.
        self.started = true;
        Ok(())
    }

    fn wrap(&mut self, plaintext: &[u8]) -> Result<EngineResult, TlsError> {
        let mut records = Vec::new();
        let mut rest = plaintext;
        loop {
            self.drain_records(&mut records)?;
            if rest.is_empty() {
                break;
            }
            // The writer takes at most the buffer limit per call.
            let n = self.conn.writer().write(rest).map_err(TlsError::Io)?;
            if n == 0 {
                return Err(TlsError::Closed);
            }
            rest = &rest[n..];
        }
        Ok(EngineResult {
            bytes: records,
            status: self.status(),
        })
    }

    fn unwrap(&mut self, records: &[u8]) -> Result<EngineResult, TlsError> {
        let mut input = records;
        let mut plaintext = Vec::new();
        while !input.is_empty() {
            if self.conn.read_tls(&mut input).map_err(TlsError::Io)? == 0 {
                break;
            }
            let io_state = self.conn.process_new_packets()?;

            let available = io_state.plaintext_bytes_to_read();
            if available > 0 {
                let start = plaintext.len();
                plaintext.resize(start + available, 0);
                self.conn
                    .reader()
                    .read_exact(&mut plaintext[start..])
                    .map_err(TlsError::Io)?;
            }
            if io_state.peer_has_closed() {
                self.peer_closed = true;
            }
        }
        Ok(EngineResult {
            bytes: plaintext,
            status: self.status(),
        })
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.conn.send_close_notify();
            self.outbound_closed = true;
        }
    }

    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn status(&self) -> EngineStatus {
        if self.peer_closed || (self.outbound_closed && !self.conn.wants_write()) {
            EngineStatus::Closed
        } else if self.conn.wants_write() {
            EngineStatus::NeedsWrap
        } else if self.conn.is_handshaking() {
            EngineStatus::NeedsUnwrap
        } else {
            EngineStatus::Complete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{Identity, TlsConfig};

    const CA: &str = include_str!("../../tests/fixtures/ca.pem");
    const CERT: &str = include_str!("../../tests/fixtures/server.pem");
    const KEY: &str = include_str!("../../tests/fixtures/server.key");

    fn engines() -> (RustlsEngine, RustlsEngine) {
        let client_config = TlsConfig::new()
            .add_root_certificate(crate::tls::Certificate::from_pem(CA).unwrap())
            .use_only_custom_roots()
            .build_client_config()
            .unwrap();
        let server_config = TlsConfig::new()
            .identity(Identity::from_pem(CERT, KEY).unwrap())
            .build_server_config()
            .unwrap();
        (
            RustlsEngine::client_for_host(client_config, "localhost").unwrap(),
            RustlsEngine::server(server_config).unwrap(),
        )
    }

    /// Shuttle records between the two engines until neither has output.
    fn pump(client: &mut RustlsEngine, server: &mut RustlsEngine) {
        for _ in 0..10 {
            let to_server = client.wrap(&[]).unwrap().bytes;
            server.unwrap(&to_server).unwrap();
            let to_client = server.wrap(&[]).unwrap().bytes;
            client.unwrap(&to_client).unwrap();
            if to_server.is_empty() && to_client.is_empty() {
                break;
            }
        }
    }

    #[test]
    fn test_client_starts_with_records_to_send() {
        let (mut client, server) = engines();
        assert!(client.is_client());
        assert!(!server.is_client());
        client.begin_handshake().unwrap();
        assert_eq!(client.status(), EngineStatus::NeedsWrap);
        assert_eq!(server.status(), EngineStatus::NeedsUnwrap);
    }

    #[test]
    fn test_handshake_and_application_data() {
        let (mut client, mut server) = engines();
        client.begin_handshake().unwrap();
        server.begin_handshake().unwrap();
        pump(&mut client, &mut server);

        assert_eq!(client.status(), EngineStatus::Complete);
        assert_eq!(server.status(), EngineStatus::Complete);

        let records = client.wrap(b"ping").unwrap().bytes;
        assert!(!records.is_empty());
        assert_ne!(&records[..], b"ping");
        assert_eq!(server.unwrap(&records).unwrap().bytes, b"ping");
    }

    #[test]
    fn test_close_notify_closes_peer() {
        let (mut client, mut server) = engines();
        client.begin_handshake().unwrap();
        server.begin_handshake().unwrap();
        pump(&mut client, &mut server);

        client.close_outbound();
        let close = client.wrap(&[]).unwrap();
        assert_eq!(close.status, EngineStatus::Closed);
        assert_eq!(server.unwrap(&close.bytes).unwrap().status, EngineStatus::Closed);
    }

    #[test]
    fn test_garbage_records_fail() {
        let (_, mut server) = engines();
        server.begin_handshake().unwrap();
        assert!(server.unwrap(b"\x16\x03\x01\x00\x05hello").is_err());
    }
}
