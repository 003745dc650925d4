//! Outbound connections to peers.
//!
//! A `PeerConnector` is built once from the peer configuration (TLS
//! material is loaded at that point, so bad credentials fail fast) and then
//! dials one connection per relay. Dialing, including the TLS handshake,
//! is bounded by the connect timeout.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use peer_core::StreamError;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::{client_async_with_config, MaybeTlsStream};
use tracing::debug;

use crate::chat::{websocket_config, WebSocketChat, CHAT_PATH};
use crate::config::PeerConfig;
use crate::tls::{self, CredentialsError};

/// Byte stream under an outbound chat.
pub type PeerStream = MaybeTlsStream<TcpStream>;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("peer address must not be empty")]
    InvalidAddress,

    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    #[error("failed to create TLS credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("timed out connecting to {address} after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("failed to connect to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {address} failed: {source}")]
    Tls {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Dials peers with the configured transport security.
#[derive(Clone)]
pub struct PeerConnector {
    /// Present iff transport encryption is enabled
    tls: Option<Arc<ClientConfig>>,
    server_name_override: Option<String>,
    connect_timeout: Duration,
}

impl PeerConnector {
    pub fn new(config: &PeerConfig) -> Result<Self, ConnectError> {
        let tls = if config.tls.enabled {
            Some(tls::client_config(&config.tls)?)
        } else {
            None
        };

        Ok(Self {
            tls,
            server_name_override: config.tls.server_name_override().map(str::to_string),
            connect_timeout: config.connect_timeout(),
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.tls.is_some()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect to `address` (`host:port`).
    pub async fn connect(&self, address: &str) -> Result<PeerConnection, ConnectError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConnectError::InvalidAddress);
        }

        match timeout(self.connect_timeout, self.dial(address)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout {
                address: address.to_string(),
                timeout: self.connect_timeout,
            }),
        }
    }

    async fn dial(&self, address: &str) -> Result<PeerConnection, ConnectError> {
        let tcp = TcpStream::connect(address)
            .await
            .map_err(|source| ConnectError::Dial {
                address: address.to_string(),
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        let Some(config) = &self.tls else {
            debug!("Connected to {} (plaintext)", address);
            return Ok(PeerConnection {
                address: address.to_string(),
                server_name: None,
                stream: MaybeTlsStream::Plain(tcp),
            });
        };

        let name = self.server_name_for(address);
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| ConnectError::InvalidServerName(name.clone()))?;

        let stream = TlsConnector::from(Arc::clone(config))
            .connect(server_name, tcp)
            .await
            .map_err(|source| ConnectError::Tls {
                address: address.to_string(),
                source,
            })?;

        debug!("Connected to {} (TLS, server name {})", address, name);
        Ok(PeerConnection {
            address: address.to_string(),
            server_name: Some(name),
            stream: MaybeTlsStream::Rustls(stream),
        })
    }

    fn server_name_for(&self, address: &str) -> String {
        match &self.server_name_override {
            Some(name) => name.clone(),
            None => host_of(address).to_string(),
        }
    }
}

/// Host part of a `host:port` address. Brackets around IPv6 literals are stripped.
pub fn host_of(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => address,
    }
}

/// An established transport session to one peer.
pub struct PeerConnection {
    address: String,
    /// Name verified against the certificate, when encrypted
    server_name: Option<String>,
    stream: PeerStream,
}

impl PeerConnection {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_encrypted(&self) -> bool {
        self.server_name.is_some()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Open the chat stream on this connection.
    pub async fn open_chat(self) -> Result<WebSocketChat<PeerStream>, StreamError> {
        let scheme = if self.is_encrypted() { "wss" } else { "ws" };
        let url = format!("{}://{}{}", scheme, self.address, CHAT_PATH);

        let (ws, _) = client_async_with_config(url, self.stream, Some(websocket_config()))
            .await
            .map_err(|e| StreamError::Open(e.to_string()))?;
        Ok(WebSocketChat::new(ws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn plain_config(timeout_secs: u64) -> PeerConfig {
        PeerConfig {
            connect_timeout_secs: timeout_secs,
            ..Default::default()
        }
    }

    // ==================== Address parsing ====================

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("peerA:7051"), "peerA");
        assert_eq!(host_of("127.0.0.1:30303"), "127.0.0.1");
        assert_eq!(host_of("[::1]:7051"), "::1");
        assert_eq!(host_of("peerA"), "peerA");
        assert_eq!(host_of("::1"), "::1");
    }

    #[test]
    fn test_server_name_override_wins() {
        let mut config = PeerConfig::default();
        config.tls.enabled = true;
        config.tls.server_host_override = Some("peer.test".into());

        let connector = PeerConnector::new(&config).unwrap();
        assert!(connector.is_encrypted());
        assert_eq!(connector.server_name_for("127.0.0.1:7051"), "peer.test");
    }

    #[test]
    fn test_server_name_defaults_to_host() {
        let mut config = PeerConfig::default();
        config.tls.enabled = true;

        let connector = PeerConnector::new(&config).unwrap();
        assert_eq!(connector.server_name_for("peerA:7051"), "peerA");
    }

    // ==================== Construction ====================

    #[test]
    fn test_bad_trust_material_fails_at_construction() {
        let mut config = PeerConfig::default();
        config.tls.enabled = true;
        config.tls.cert.file = Some("/nonexistent/ca.pem".into());

        assert!(matches!(
            PeerConnector::new(&config),
            Err(ConnectError::Credentials(_))
        ));
    }

    #[test]
    fn test_trust_material_ignored_when_disabled() {
        let mut config = PeerConfig::default();
        config.tls.cert.file = Some("/nonexistent/ca.pem".into());

        let connector = PeerConnector::new(&config).unwrap();
        assert!(!connector.is_encrypted());
    }

    // ==================== Dialing ====================

    #[tokio::test]
    async fn test_empty_address_rejected() {
        let connector = PeerConnector::new(&plain_config(3)).unwrap();
        assert!(matches!(
            connector.connect("  ").await,
            Err(ConnectError::InvalidAddress)
        ));
    }

    #[tokio::test]
    async fn test_connect_plaintext() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let connector = PeerConnector::new(&plain_config(3)).unwrap();
        let conn = connector.connect(&addr).await.unwrap();

        assert_eq!(conn.address(), addr);
        assert!(!conn.is_encrypted());
        assert!(conn.server_name().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = PeerConnector::new(&plain_config(3)).unwrap();
        match connector.connect(&addr).await {
            Err(ConnectError::Dial { address, .. }) => assert_eq!(address, addr),
            Err(other) => panic!("Expected Dial error, got {}", other),
            Ok(_) => panic!("Expected Dial error, got a connection"),
        }
    }

    #[tokio::test]
    async fn test_tls_handshake_timeout() {
        // Accepts TCP but never speaks TLS
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut config = plain_config(1);
        config.tls.enabled = true;
        let connector = PeerConnector::new(&config).unwrap();

        let started = std::time::Instant::now();
        let result = connector.connect(&addr).await;

        assert!(matches!(result, Err(ConnectError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
