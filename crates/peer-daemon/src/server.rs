//! Peer server accepting inbound chat streams.
//!
//! Every accepted connection gets its own task: optional TLS, the
//! WebSocket upgrade on `/chat`, then a `HandshakeSession` until the peer
//! hangs up. Sessions share nothing except the sender for received
//! transaction batches, and a failing session never stops the accept loop.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::chat::{websocket_config, WebSocketChat, CHAT_PATH};
use crate::config::PeerConfig;
use crate::session::{HandshakeSession, InboundTransactions};
use crate::tls::{self, CredentialsError};

/// Pause after the first failed accept; doubles per consecutive failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Server side of the peer protocol.
pub struct PeerServer {
    tls: Option<TlsAcceptor>,
    transactions: mpsc::UnboundedSender<InboundTransactions>,
}

impl PeerServer {
    /// Create a server and the receiver for transaction batches it accepts.
    pub fn new(
        config: &PeerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundTransactions>), CredentialsError> {
        let tls = if config.tls.enabled {
            Some(TlsAcceptor::from(tls::server_config(&config.tls)?))
        } else {
            None
        };
        let (transactions, transactions_rx) = mpsc::unbounded_channel();

        Ok((Self { tls, transactions }, transactions_rx))
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Peer server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Accept connections forever, one session task per connection.
    ///
    /// Accept errors (e.g. out of file descriptors) back off before retrying.
    pub async fn run(&self, listener: TcpListener) {
        let mut failures = 0u32;
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    failures = 0;
                    self.spawn_session(stream, addr);
                }
                Err(e) => {
                    let pause = accept_backoff(failures);
                    error!("Failed to accept connection: {} (retrying in {:?})", e, pause);
                    failures = failures.saturating_add(1);
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        let tls = self.tls.clone();
        let transactions = self.transactions.clone();
        let span = info_span!("chat", peer = %addr);

        tokio::spawn(
            async move {
                let _ = stream.set_nodelay(true);
                match tls {
                    None => serve_stream(stream, addr, transactions).await,
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => serve_stream(stream, addr, transactions).await,
                        Err(e) => warn!("TLS handshake with {} failed: {}", addr, e),
                    },
                }
            }
            .instrument(span),
        );
    }
}

async fn serve_stream<S>(
    stream: S,
    addr: SocketAddr,
    transactions: mpsc::UnboundedSender<InboundTransactions>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let ws = match accept_hdr_async_with_config(stream, check_path, Some(websocket_config())).await {
        Ok(ws) => ws,
        Err(e) => {
            // Health checks (like `nc -z`) connect and close without upgrading
            let err_str = e.to_string();
            if err_str.contains("Handshake not finished")
                || err_str.contains("Connection reset")
                || err_str.contains("unexpected EOF")
            {
                debug!("Connection closed before upgrade from {}", addr);
            } else {
                error!("WebSocket upgrade failed for {}: {}", addr, e);
            }
            return;
        }
    };

    info!("New chat stream from {}", addr);
    let session = HandshakeSession::new(addr.to_string(), WebSocketChat::new(ws))
        .with_transactions(transactions);

    match session.run().await {
        Ok(()) => debug!("Chat with {} ended", addr),
        Err(e) => warn!("Chat with {} failed: {}", addr, e),
    }
}

fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << failures.min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == CHAT_PATH {
        return Ok(response);
    }

    let mut rejection = ErrorResponse::new(Some(format!("unknown path {}", request.uri().path())));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}
