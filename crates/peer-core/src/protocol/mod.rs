//! Protocol definitions for peer chat streams.
//!
//! - Wire messages and their type tags
//! - The discovery handshake state machine

pub mod handshake;
pub mod message;

pub use handshake::{expect_hello, HandshakeError, HandshakePhase, Reaction, ServerHandshake};
pub use message::{CodecError, MessageType, WireMessage, MAX_MESSAGE_SIZE, MAX_PAYLOAD_SIZE};
