//! Outbound transaction relay.
//!
//! One relay call is one round trip: dial, open the chat, send
//! `DISC_HELLO`, wait for the peer's hello, send the batch as
//! `CHAIN_TRANSACTIONS`, close. A single receive task performs the one
//! receive and reports its outcome over a oneshot channel; the caller waits
//! on that channel with the reply deadline.

use std::sync::Arc;
use std::time::Duration;

use peer_core::protocol::expect_hello;
use peer_core::{CodecError, HandshakeError, MessageType, StreamError, TransactionBatch, WireMessage};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::chat::{ChatReceiver, ChatSender};
use crate::config::PeerConfig;
use crate::connector::{ConnectError, PeerConnector};

/// How long to wait for the peer to acknowledge our close.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Error sending transactions to peer address={address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: ConnectError,
    },

    #[error("Error sending transactions to peer address={address}: {source}")]
    Stream {
        address: String,
        #[source]
        source: StreamError,
    },

    #[error("Error sending transactions to peer address={address}, received EOF when expecting {expected}")]
    ClosedBeforeReply {
        address: String,
        expected: MessageType,
    },

    #[error("Error sending transactions to peer address={address}: handshake failed: {source}")]
    HandshakeFailed {
        address: String,
        #[source]
        source: HandshakeError,
    },

    #[error("Error marshalling transactions to peer address={address}: {source}")]
    Serialization {
        address: String,
        #[source]
        source: CodecError,
    },

    #[error("Error sending transactions to peer address={address}: no reply within {timeout:?}")]
    ReplyTimeout { address: String, timeout: Duration },

    #[error("Error sending transactions to peer address={address}: receive task ended without an outcome")]
    ReceiveTaskLost { address: String },
}

impl RelayError {
    /// Address of the peer the failed relay targeted.
    pub fn address(&self) -> &str {
        match self {
            Self::Connect { address, .. }
            | Self::Stream { address, .. }
            | Self::ClosedBeforeReply { address, .. }
            | Self::HandshakeFailed { address, .. }
            | Self::Serialization { address, .. }
            | Self::ReplyTimeout { address, .. }
            | Self::ReceiveTaskLost { address } => address,
        }
    }
}

/// Client side of the peer protocol.
#[derive(Clone)]
pub struct TransactionRelay {
    connector: PeerConnector,
    default_address: String,
    reply_timeout: Duration,
}

impl TransactionRelay {
    pub fn new(config: &PeerConfig) -> Result<Self, ConnectError> {
        Ok(Self::with_connector(PeerConnector::new(config)?, config))
    }

    /// Use an already built connector.
    pub fn with_connector(connector: PeerConnector, config: &PeerConfig) -> Self {
        Self {
            connector,
            default_address: config.address.clone(),
            reply_timeout: config.reply_timeout(),
        }
    }

    pub fn default_address(&self) -> &str {
        &self.default_address
    }

    /// Relay `batch` to the configured `peer.address`.
    pub async fn send_to_default(&self, batch: &TransactionBatch) -> Result<(), RelayError> {
        self.send(&self.default_address, batch).await
    }

    /// Relay `batch` to the peer at `address`.
    pub async fn send(&self, address: &str, batch: &TransactionBatch) -> Result<(), RelayError> {
        let span = info_span!("relay", peer = %address);
        self.round_trip(address, batch).instrument(span).await
    }

    async fn round_trip(&self, address: &str, batch: &TransactionBatch) -> Result<(), RelayError> {
        let conn = self
            .connector
            .connect(address)
            .await
            .map_err(|source| RelayError::Connect {
                address: address.to_string(),
                source,
            })?;

        let chat = match timeout(self.connector.connect_timeout(), conn.open_chat()).await {
            Ok(Ok(chat)) => chat,
            Ok(Err(source)) => {
                return Err(RelayError::Stream {
                    address: address.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(RelayError::Connect {
                    address: address.to_string(),
                    source: ConnectError::Timeout {
                        address: address.to_string(),
                        timeout: self.connector.connect_timeout(),
                    },
                });
            }
        };
        debug!("Opened chat with {}", address);

        let (sender, receiver) = chat.split();
        let sender = Arc::new(Mutex::new(sender));

        let hello = sender
            .lock()
            .await
            .send(WireMessage::control(MessageType::DiscHello))
            .await;
        if let Err(source) = hello {
            close_send(&sender, address).await;
            return Err(RelayError::Stream {
                address: address.to_string(),
                source,
            });
        }

        let (done_tx, done_rx) = oneshot::channel();
        let reader = {
            let sender = Arc::clone(&sender);
            let address = address.to_string();
            let batch = batch.clone();
            let mut receiver = receiver;
            tokio::spawn(
                async move {
                    let outcome = exchange(&address, &mut receiver, &sender, &batch).await;
                    let _ = done_tx.send(outcome);
                    receiver
                }
                .in_current_span(),
            )
        };

        let outcome = match timeout(self.reply_timeout, done_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RelayError::ReceiveTaskLost {
                address: address.to_string(),
            }),
            Err(_) => Err(RelayError::ReplyTimeout {
                address: address.to_string(),
                timeout: self.reply_timeout,
            }),
        };

        // A timed out reader may still hold the sender lock
        if outcome.is_err() && !reader.is_finished() {
            reader.abort();
        }
        close_send(&sender, address).await;

        if let Ok(Ok(mut receiver)) = timeout(CLOSE_GRACE, reader).await {
            if timeout(CLOSE_GRACE, drain(&mut receiver)).await.is_err() {
                debug!("Peer {} did not acknowledge close", address);
            }
        }

        outcome
    }
}

/// The single receive and its follow-up send.
async fn exchange<S>(
    address: &str,
    receiver: &mut ChatReceiver<S>,
    sender: &Mutex<ChatSender<S>>,
    batch: &TransactionBatch,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let reply = match receiver.recv().await {
        Ok(Some(reply)) => reply,
        Ok(None) => {
            return Err(RelayError::ClosedBeforeReply {
                address: address.to_string(),
                expected: MessageType::DiscHello,
            });
        }
        Err(source) => {
            return Err(RelayError::Stream {
                address: address.to_string(),
                source,
            });
        }
    };

    expect_hello(&reply).map_err(|source| RelayError::HandshakeFailed {
        address: address.to_string(),
        source,
    })?;
    debug!("Received DISC_HELLO from {}", address);

    let payload = batch
        .to_payload()
        .map_err(|source| RelayError::Serialization {
            address: address.to_string(),
            source,
        })?;

    sender
        .lock()
        .await
        .send(WireMessage::with_payload(
            MessageType::ChainTransactions,
            payload,
        ))
        .await
        .map_err(|source| RelayError::Stream {
            address: address.to_string(),
            source,
        })?;

    info!("Sent {} transaction(s) to {}", batch.len(), address);
    Ok(())
}

async fn close_send<S>(sender: &Mutex<ChatSender<S>>, address: &str)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let closed = timeout(CLOSE_GRACE, async { sender.lock().await.close().await }).await;
    match closed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Failed to close chat with {}: {}", address, e),
        Err(_) => warn!("Timed out closing chat with {}", address),
    }
}

async fn drain<S>(receiver: &mut ChatReceiver<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    while let Ok(Some(msg)) = receiver.recv().await {
        debug!("Discarding {} received after the exchange", msg.msg_type);
    }
}
