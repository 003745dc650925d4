//! TLS credentials for chat connections.
//!
//! Client side: PEM trust material from `peer.tls.cert.file` is pinned as
//! the root store. Without it, any server certificate is accepted. That
//! mode is meant for development only and logs a warning.
//!
//! Server side: `peer.tls.cert.file` holds the certificate chain and
//! `peer.tls.key.file` the private key.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TlsConfig;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("No private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("Invalid certificate in {path:?}: {source}")]
    InvalidCertificate {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("Server TLS requires both peer.tls.cert.file and peer.tls.key.file")]
    MissingServerIdentity,

    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the client-side TLS configuration.
pub fn client_config(tls: &TlsConfig) -> Result<Arc<ClientConfig>, CredentialsError> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let config = match tls.cert.path() {
        Some(path) => {
            let roots = load_root_store(path)?;
            debug!("Pinned {} trust anchor(s) from {:?}", roots.len(), path);
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        None => {
            warn!("TLS enabled without peer.tls.cert.file, server certificates will not be verified");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider)))
                .with_no_client_auth()
        }
    };

    Ok(Arc::new(config))
}

/// Build the server-side TLS configuration.
pub fn server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>, CredentialsError> {
    let (cert_path, key_path) = match (tls.cert.path(), tls.key.path()) {
        (Some(cert), Some(key)) => (cert, key),
        _ => return Err(CredentialsError::MissingServerIdentity),
    };

    let chain = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>, CredentialsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CredentialsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Read every PEM certificate in `path`.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CredentialsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(CredentialsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_root_store(path: &Path) -> Result<RootCertStore, CredentialsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|source| CredentialsError::InvalidCertificate {
                path: path.to_path_buf(),
                source,
            })?;
    }
    Ok(roots)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CredentialsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| CredentialsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| CredentialsError::NoPrivateKey(path.to_path_buf()))
}

/// Verifier that accepts any server certificate.
///
/// Handshake signatures are still checked, so the peer must hold the key
/// for the certificate it presents.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyServerCert {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
