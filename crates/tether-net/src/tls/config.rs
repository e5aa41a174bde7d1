//! Certificate, key and protocol settings for TLS sockets.
//!
//! # Trusting a private CA
//!
//! ```ignore
//! use tether_net::tls::{Certificate, TlsConfig};
//!
//! let ca = Certificate::from_pem_file("/path/to/ca.pem")?;
//! let client = TlsConfig::new()
//!     .add_root_certificate(ca)
//!     .use_only_custom_roots()
//!     .build_client_config()?;
//! ```
//!
//! # Serving
//!
//! ```ignore
//! use tether_net::tls::{Identity, TlsConfig};
//!
//! let identity = Identity::from_pem_files("/path/to/server.pem", "/path/to/server.key")?;
//! let server = TlsConfig::new().identity(identity).build_server_config()?;
//! ```

use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{NetError, Result, TlsError};

fn config_error(message: impl Into<String>) -> NetError {
    NetError::Tls(TlsError::Config(message.into()))
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| config_error(format!("Failed to read {what} '{}': {e}", path.display())))
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(Cursor::new(pem));
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| config_error(format!("Failed to parse PEM certificate: {e}")))
}

/// The crypto provider every config is built with.
fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2 (default minimum).
    #[default]
    Tls1_2,
    /// TLS 1.3 only.
    Tls1_3,
}

impl TlsVersion {
    pub(crate) fn to_rustls_versions(self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        match self {
            TlsVersion::Tls1_2 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::Tls1_3 => vec![&rustls::version::TLS13],
        }
    }
}

/// An ALPN protocol identifier, e.g. `b"tether/1"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlpnProtocol(Vec<u8>);

impl AlpnProtocol {
    /// Wrap a protocol identifier.
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self(id.into())
    }

    /// Get the protocol identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to owned bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.clone()
    }
}

/// One or more X.509 certificates, used as trust roots.
#[derive(Clone)]
pub struct Certificate {
    der_certs: Vec<CertificateDer<'static>>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("cert_count", &self.der_certs.len())
            .finish()
    }
}

impl Certificate {
    /// Load certificates from PEM-encoded bytes.
    pub fn from_pem(pem_data: impl AsRef<[u8]>) -> Result<Self> {
        let der_certs = parse_certs(pem_data.as_ref())?;
        if der_certs.is_empty() {
            return Err(config_error("No certificates found in PEM data"));
        }
        Ok(Self { der_certs })
    }

    /// Load certificates from a PEM-encoded file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(read_file(path.as_ref(), "certificate file")?)
    }

    /// Wrap a DER-encoded certificate.
    pub fn from_der(der_data: impl Into<Vec<u8>>) -> Self {
        Self {
            der_certs: vec![CertificateDer::from(der_data.into())],
        }
    }

    pub(crate) fn der_certs(&self) -> &[CertificateDer<'static>] {
        &self.der_certs
    }
}

/// A certificate chain and its private key, presented to the peer.
pub struct Identity {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("cert_count", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Create an identity from PEM-encoded certificate chain and key bytes.
    ///
    /// The leaf certificate comes first, followed by any intermediates.
    pub fn from_pem(cert_pem: impl AsRef<[u8]>, key_pem: impl AsRef<[u8]>) -> Result<Self> {
        let cert_chain = parse_certs(cert_pem.as_ref())?;
        if cert_chain.is_empty() {
            return Err(config_error("No certificates found in PEM data"));
        }

        let mut key_reader = BufReader::new(Cursor::new(key_pem.as_ref()));
        let private_key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| config_error(format!("Failed to parse private key PEM: {e}")))?
            .ok_or_else(|| config_error("No private key found in PEM data"))?;

        Ok(Self {
            cert_chain,
            private_key,
        })
    }

    /// Create an identity from a single PEM holding both the chain and the key.
    pub fn from_pem_combined(pem_data: impl AsRef<[u8]>) -> Result<Self> {
        Self::from_pem(pem_data.as_ref(), pem_data.as_ref())
    }

    /// Create an identity from PEM-encoded files.
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_pem = read_file(cert_path.as_ref(), "certificate file")?;
        let key_pem = read_file(key_path.as_ref(), "key file")?;
        Self::from_pem(cert_pem, key_pem)
    }
}

/// TLS settings shared by the client and server side.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Additional root certificates to trust.
    pub root_certificates: Vec<Certificate>,
    /// Whether to use only the provided root certificates (no bundled roots).
    pub use_only_custom_roots: bool,
    /// Certificate and key: the server's identity, or a client certificate.
    pub identity: Option<Identity>,
    /// Minimum TLS version.
    pub min_version: TlsVersion,
    /// ALPN protocols to advertise.
    pub alpn_protocols: Vec<AlpnProtocol>,
    /// Accept any server certificate (DANGEROUS - testing only).
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Create a new TLS configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root certificate to trust.
    pub fn add_root_certificate(mut self, cert: Certificate) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Use only custom root certificates.
    pub fn use_only_custom_roots(mut self) -> Self {
        self.use_only_custom_roots = true;
        self
    }

    /// Set the identity presented to the peer.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the minimum TLS version.
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Add an ALPN protocol.
    pub fn alpn_protocol(mut self, protocol: AlpnProtocol) -> Self {
        self.alpn_protocols.push(protocol);
        self
    }

    /// Accept any server certificate (DANGEROUS - for testing only).
    ///
    /// # Warning
    ///
    /// This disables certificate verification and makes the connection
    /// vulnerable to man-in-the-middle attacks.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }

    /// Build a rustls client configuration.
    pub fn build_client_config(&self) -> Result<Arc<ClientConfig>> {
        let versions = self.min_version.to_rustls_versions();
        let builder = ClientConfig::builder_with_provider(provider())
            .with_protocol_versions(&versions)
            .map_err(|e| config_error(format!("Unsupported protocol versions: {e}")))?;

        let builder = if self.danger_accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        } else {
            builder.with_root_certificates(self.build_root_store()?)
        };

        let mut config = match &self.identity {
            Some(identity) => builder
                .with_client_auth_cert(
                    identity.cert_chain.clone(),
                    identity.private_key.clone_key(),
                )
                .map_err(|e| config_error(format!("Invalid client certificate: {e}")))?,
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = self.alpn_protocols.iter().map(AlpnProtocol::to_vec).collect();

        Ok(Arc::new(config))
    }

    /// Build a rustls server configuration. Requires an [`Identity`].
    pub fn build_server_config(&self) -> Result<Arc<ServerConfig>> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| config_error("A server identity is required"))?;

        let versions = self.min_version.to_rustls_versions();
        let mut config = ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&versions)
            .map_err(|e| config_error(format!("Unsupported protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(identity.cert_chain.clone(), identity.private_key.clone_key())
            .map_err(|e| config_error(format!("Invalid server certificate: {e}")))?;
        config.alpn_protocols = self.alpn_protocols.iter().map(AlpnProtocol::to_vec).collect();

        Ok(Arc::new(config))
    }

    fn build_root_store(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();

        if !self.use_only_custom_roots {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        for cert in &self.root_certificates {
            for der_cert in cert.der_certs() {
                root_store
                    .add(der_cert.clone())
                    .map_err(|e| config_error(format!("Failed to add root certificate: {e}")))?;
            }
        }

        if root_store.is_empty() {
            return Err(config_error(
                "No root certificates available. Either add custom certificates or \
                 don't use use_only_custom_roots()",
            ));
        }

        Ok(root_store)
    }
}

/// Certificate verifier that accepts every server certificate.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
