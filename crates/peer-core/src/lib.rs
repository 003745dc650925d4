//! peer-core: protocol library for the peer discovery handshake and
//! transaction relay.
//!
//! This crate provides:
//! - Wire messages and the message type enumeration
//! - The server-side handshake state machine
//! - Transaction batches and their payload encoding
//! - The `ChatStream` abstraction sessions are driven over

pub mod protocol;
pub mod stream;
pub mod transaction;

pub use protocol::{CodecError, HandshakeError, MessageType, WireMessage};
pub use stream::{ChatStream, StreamError};
pub use transaction::{Transaction, TransactionBatch};
