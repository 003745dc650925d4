//! Server-side handshake session.
//!
//! One session owns one inbound chat stream for its lifetime. It receives
//! messages in arrival order, reacts through the handshake state machine,
//! and ends cleanly when the peer closes its side.

use peer_core::protocol::{HandshakePhase, Reaction, ServerHandshake};
use peer_core::{ChatStream, CodecError, HandshakeError, StreamError, TransactionBatch};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] HandshakeError),

    #[error("malformed transaction batch: {0}")]
    MalformedTransactions(#[source] CodecError),
}

/// A transaction batch received from a peer that completed the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTransactions {
    /// Remote address of the sending peer
    pub peer: String,
    pub batch: TransactionBatch,
}

/// Handler bound to one inbound chat stream.
pub struct HandshakeSession<S> {
    peer: String,
    stream: S,
    handshake: ServerHandshake,
    transactions: Option<mpsc::UnboundedSender<InboundTransactions>>,
}

impl<S: ChatStream> HandshakeSession<S> {
    pub fn new(peer: impl Into<String>, stream: S) -> Self {
        Self {
            peer: peer.into(),
            stream,
            handshake: ServerHandshake::new(),
            transactions: None,
        }
    }

    /// Forward accepted transaction batches to `tx`.
    pub fn with_transactions(mut self, tx: mpsc::UnboundedSender<InboundTransactions>) -> Self {
        self.transactions = Some(tx);
        self
    }

    pub fn phase(&self) -> HandshakePhase {
        self.handshake.phase()
    }

    /// Serve the stream until the peer closes it.
    ///
    /// Receive and send failures end the session with an error. A
    /// transaction batch sent before `DISC_HELLO` is rejected with a
    /// warning and the session keeps waiting.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            let msg = match self.stream.recv().await? {
                Some(msg) => msg,
                None => {
                    debug!("Received EOF, ending chat with {}", self.peer);
                    if let Err(e) = self.stream.close().await {
                        debug!("Failed to acknowledge close from {}: {}", self.peer, e);
                    }
                    return Ok(());
                }
            };

            let reaction = match self.handshake.on_message(msg) {
                Ok(reaction) => reaction,
                Err(e @ HandshakeError::OutOfOrder(_)) => {
                    warn!("Rejected message from {}: {}", self.peer, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match reaction {
                Reaction::Reply(reply) => self.stream.send(reply).await?,
                Reaction::Deliver(payload) => self.deliver(&payload)?,
                Reaction::Ignore => {}
            }
        }
    }

    fn deliver(&self, payload: &[u8]) -> Result<(), SessionError> {
        let batch =
            TransactionBatch::from_payload(payload).map_err(SessionError::MalformedTransactions)?;
        info!(
            "Received {} transaction(s) from {}",
            batch.len(),
            self.peer
        );

        let Some(tx) = &self.transactions else {
            debug!("No transaction consumer, dropping batch from {}", self.peer);
            return Ok(());
        };

        let inbound = InboundTransactions {
            peer: self.peer.clone(),
            batch,
        };
        if tx.send(inbound).is_err() {
            warn!(
                "Transaction consumer is gone, dropping batch from {}",
                self.peer
            );
        }
        Ok(())
    }
}
