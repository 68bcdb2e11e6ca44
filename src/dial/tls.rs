//! TLS client handshake on top of an established TCP connection.
//!
//! The dialer connects first and then hands the socket to a [`Handshake`].
//! Keeping the two steps apart is what lets it tell "host unreachable" from
//! "host reachable but the handshake failed".

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::warn;

use super::BoxedIo;
use crate::error::Error;

/// Turns a freshly connected socket into a secured stream.
#[async_trait]
pub trait Handshake: Send + Sync + 'static {
    /// `server_name` is the host part of the dialed address.
    async fn handshake(&self, server_name: &str, stream: TcpStream) -> io::Result<BoxedIo>;
}

/// Which server certificates to trust.
#[derive(Clone, Debug)]
pub enum Roots {
    /// The Mozilla root program, bundled.
    WebPki,
    /// CA certificates from a PEM file.
    Pem(PathBuf),
    /// Accept any certificate. For tests and local development only.
    SkipVerification,
}

/// What a [`TlsHandshake`] is built from.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    roots: Roots,
    identity: Option<(PathBuf, PathBuf)>,
    server_name: Option<String>,
}

impl TlsConfig {
    pub fn new(roots: Roots) -> Self {
        Self { roots, identity: None, server_name: None }
    }

    /// Presents the PEM certificate chain and key for mutual TLS.
    pub fn client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.identity = Some((cert.into(), key.into()));
        self
    }

    /// Verifies the server as `name` instead of the dialed host.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// rustls client handshake.
///
/// Certificates and keys are read once, when the handshake is built; a
/// missing or malformed file fails there, not on the first dial.
#[derive(Clone)]
pub struct TlsHandshake {
    connector: TlsConnector,
    server_name: Option<ServerName<'static>>,
}

impl TlsHandshake {
    pub fn new(config: &TlsConfig) -> Result<Self, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;

        let builder = match &config.roots {
            Roots::WebPki => {
                let roots: RootCertStore = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
                builder.with_root_certificates(roots)
            }
            Roots::Pem(path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(path)? {
                    roots
                        .add(cert)
                        .map_err(|e| Error::Tls(format!("failed to append ca certs from {}: {e}", path.display())))?;
                }
                builder.with_root_certificates(roots)
            }
            Roots::SkipVerification => {
                warn!("tls certificate verification is disabled");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            }
        };

        let client = match &config.identity {
            Some((cert, key)) => builder
                .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
                .map_err(|e| Error::Tls(format!("invalid client identity: {e}")))?,
            None => builder.with_no_client_auth(),
        };

        let server_name = config
            .server_name
            .as_deref()
            .map(|name| {
                ServerName::try_from(name.to_owned())
                    .map_err(|e| Error::Tls(format!("invalid server name `{name}`: {e}")))
            })
            .transpose()?;

        Ok(Self { connector: TlsConnector::from(Arc::new(client)), server_name })
    }
}

#[async_trait]
impl Handshake for TlsHandshake {
    async fn handshake(&self, server_name: &str, stream: TcpStream) -> io::Result<BoxedIo> {
        let name = match &self.server_name {
            Some(name) => name.clone(),
            None => ServerName::try_from(server_name.to_owned())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
        };
        let tls = self.connector.connect(name, stream).await?;
        Ok(Box::new(tls))
    }
}

impl fmt::Debug for TlsHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsHandshake").field("server_name", &self.server_name).finish_non_exhaustive()
    }
}

// ── PEM loading ───────────────────────────────────────────────────────────────

fn open(path: &Path) -> Result<BufReader<File>, Error> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Tls(format!("could not read {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("bad certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| Error::Tls(format!("bad private key in {}: {e}", path.display())))?
        .ok_or_else(|| Error::Tls(format!("no private key in {}", path.display())))
}

// ── Verification disabled ─────────────────────────────────────────────────────

/// Accepts every certificate but still checks handshake signatures, so the
/// peer must at least hold the key of the certificate it presents.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
