//! ChatStream trait for bidirectional message streams.
//!
//! Implementations:
//! - WebSocket (plain or TLS), in peer-daemon
//! - In-memory doubles in tests

use crate::protocol::{CodecError, WireMessage};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to open chat stream: {0}")]
    Open(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Malformed message: {0}")]
    Malformed(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// One side of an open chat stream.
///
/// Either party may send at any time; messages are received in arrival
/// order.
#[async_trait]
pub trait ChatStream: Send {
    /// Send a message to the peer
    async fn send(&mut self, msg: WireMessage) -> Result<()>;

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed its sending side. That is
    /// the normal end of a stream, not an error.
    async fn recv(&mut self) -> Result<Option<WireMessage>>;

    /// Close our sending side. Also completes a close the peer started.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use std::collections::VecDeque;

    /// Stream that replays queued messages then reports end-of-input.
    struct Replay {
        inbound: VecDeque<WireMessage>,
        sent: Vec<WireMessage>,
    }

    #[async_trait]
    impl ChatStream for Replay {
        async fn send(&mut self, msg: WireMessage) -> Result<()> {
            self.sent.push(msg);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<WireMessage>> {
            Ok(self.inbound.pop_front())
        }
    }

    #[tokio::test]
    async fn test_trait_object_usage() {
        let mut stream: Box<dyn ChatStream> = Box::new(Replay {
            inbound: VecDeque::from(vec![WireMessage::control(MessageType::DiscHello)]),
            sent: Vec::new(),
        });

        stream
            .send(WireMessage::control(MessageType::DiscGetPeers))
            .await
            .unwrap();
        let first = stream.recv().await.unwrap();
        assert_eq!(first.map(|m| m.msg_type), Some(MessageType::DiscHello));
        assert!(stream.recv().await.unwrap().is_none());
        assert!(stream.close().await.is_ok());
    }

    #[test]
    fn test_malformed_wraps_codec_error() {
        let codec = WireMessage::decode(&[]).unwrap_err();
        let err: StreamError = codec.into();
        assert!(err.to_string().starts_with("Malformed message: Failed to decode"));
    }
}
