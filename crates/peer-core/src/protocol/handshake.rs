//! Discovery handshake state machine.
//!
//! The server side of a chat stream starts in `AwaitingHello` and moves to
//! `Ready` once the peer says `DISC_HELLO`. Discovery requests are answered
//! in either phase; transaction batches are only accepted once `Ready`.
//!
//! This module only decides how to react to a message. Driving the stream
//! is left to the session that owns it.

use super::message::{MessageType, WireMessage};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// A content message arrived before the peer said hello.
    #[error("received {0} before {hello}", hello = MessageType::DiscHello)]
    OutOfOrder(MessageType),

    /// The peer answered with something other than what we asked for.
    #[error("expected {expected}, received {received}")]
    Unexpected {
        expected: MessageType,
        received: MessageType,
    },
}

/// Where a server-side session is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Stream open, no `DISC_HELLO` seen yet
    AwaitingHello,
    /// `DISC_HELLO` received and answered
    Ready,
}

/// What the session should do with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Send this message back to the peer
    Reply(WireMessage),
    /// Hand a `CHAIN_TRANSACTIONS` payload upstream
    Deliver(Vec<u8>),
    /// Discard the message and keep waiting
    Ignore,
}

/// Server-side handshake dispatcher for one stream.
#[derive(Debug)]
pub struct ServerHandshake {
    phase: HandshakePhase,
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self {
            phase: HandshakePhase::AwaitingHello,
        }
    }
}

impl ServerHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Decide how to react to `msg`, advancing the phase when needed.
    pub fn on_message(&mut self, msg: WireMessage) -> Result<Reaction, HandshakeError> {
        match msg.msg_type {
            MessageType::DiscHello => {
                debug!(
                    "Got {}, sending back {}",
                    MessageType::DiscHello,
                    MessageType::DiscHello
                );
                self.phase = HandshakePhase::Ready;
                Ok(Reaction::Reply(WireMessage::control(MessageType::DiscHello)))
            }
            MessageType::DiscGetPeers => {
                debug!("Got {}, sending back peers", MessageType::DiscGetPeers);
                Ok(Reaction::Reply(WireMessage::control(MessageType::DiscPeers)))
            }
            MessageType::ChainTransactions => match self.phase {
                HandshakePhase::Ready => Ok(Reaction::Deliver(msg.payload)),
                HandshakePhase::AwaitingHello => Err(HandshakeError::OutOfOrder(msg.msg_type)),
            },
            other => {
                debug!(
                    "Got unexpected message {}, with bytes length = {}, doing nothing",
                    other,
                    msg.payload.len()
                );
                Ok(Reaction::Ignore)
            }
        }
    }
}

/// Client-side check of the reply to our `DISC_HELLO`.
pub fn expect_hello(reply: &WireMessage) -> Result<(), HandshakeError> {
    if reply.msg_type == MessageType::DiscHello {
        Ok(())
    } else {
        Err(HandshakeError::Unexpected {
            expected: MessageType::DiscHello,
            received: reply.msg_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Replies ====================

    #[test]
    fn test_hello_is_answered_with_empty_hello() {
        let mut hs = ServerHandshake::new();
        let reaction = hs
            .on_message(WireMessage::control(MessageType::DiscHello))
            .unwrap();

        assert_eq!(
            reaction,
            Reaction::Reply(WireMessage::control(MessageType::DiscHello))
        );
        assert_eq!(hs.phase(), HandshakePhase::Ready);
    }

    #[test]
    fn test_get_peers_answered_before_hello() {
        let mut hs = ServerHandshake::new();
        let reaction = hs
            .on_message(WireMessage::control(MessageType::DiscGetPeers))
            .unwrap();

        assert_eq!(
            reaction,
            Reaction::Reply(WireMessage::control(MessageType::DiscPeers))
        );
        assert_eq!(hs.phase(), HandshakePhase::AwaitingHello);
    }

    #[test]
    fn test_repeated_hello_is_answered_each_time() {
        let mut hs = ServerHandshake::new();
        for _ in 0..3 {
            let reaction = hs
                .on_message(WireMessage::control(MessageType::DiscHello))
                .unwrap();
            assert!(matches!(reaction, Reaction::Reply(_)));
        }
        assert_eq!(hs.phase(), HandshakePhase::Ready);
    }

    // ==================== Ignored types ====================

    #[test]
    fn test_other_types_are_ignored_in_any_phase() {
        let ignored = [
            MessageType::Undefined,
            MessageType::DiscDisconnect,
            MessageType::DiscPeers,
            MessageType::ChainStatus,
            MessageType::Unknown(99),
        ];

        let mut hs = ServerHandshake::new();
        for msg_type in ignored {
            let reaction = hs
                .on_message(WireMessage::with_payload(msg_type, vec![1, 2, 3]))
                .unwrap();
            assert_eq!(reaction, Reaction::Ignore, "{} should be ignored", msg_type);
        }
        assert_eq!(hs.phase(), HandshakePhase::AwaitingHello);

        hs.on_message(WireMessage::control(MessageType::DiscHello))
            .unwrap();
        for msg_type in ignored {
            let reaction = hs.on_message(WireMessage::control(msg_type)).unwrap();
            assert_eq!(reaction, Reaction::Ignore);
        }
    }

    // ==================== Transactions ====================

    #[test]
    fn test_transactions_before_hello_rejected() {
        let mut hs = ServerHandshake::new();
        let err = hs
            .on_message(WireMessage::with_payload(
                MessageType::ChainTransactions,
                vec![1],
            ))
            .unwrap_err();

        assert_eq!(err, HandshakeError::OutOfOrder(MessageType::ChainTransactions));
        assert_eq!(
            err.to_string(),
            "received CHAIN_TRANSACTIONS before DISC_HELLO"
        );
    }

    #[test]
    fn test_transactions_after_hello_delivered() {
        let mut hs = ServerHandshake::new();
        hs.on_message(WireMessage::control(MessageType::DiscHello))
            .unwrap();

        let reaction = hs
            .on_message(WireMessage::with_payload(
                MessageType::ChainTransactions,
                vec![4, 5, 6],
            ))
            .unwrap();
        assert_eq!(reaction, Reaction::Deliver(vec![4, 5, 6]));
    }

    // ==================== Client check ====================

    #[test]
    fn test_expect_hello() {
        assert!(expect_hello(&WireMessage::control(MessageType::DiscHello)).is_ok());

        let err = expect_hello(&WireMessage::control(MessageType::DiscPeers)).unwrap_err();
        assert_eq!(
            err,
            HandshakeError::Unexpected {
                expected: MessageType::DiscHello,
                received: MessageType::DiscPeers,
            }
        );
        assert_eq!(err.to_string(), "expected DISC_HELLO, received DISC_PEERS");
    }
}
