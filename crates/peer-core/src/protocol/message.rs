//! Wire messages exchanged on a chat stream.
//!
//! Every message is a type tag from a fixed enumeration plus an opaque
//! payload. The encoding is bincode; the tag travels as an `i32` so that
//! both sides agree on numbering and unknown tags survive decoding.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Maximum encoded message size (50MB), enforced on both send and receive.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Bytes the envelope adds around a payload: `i32` tag plus `u64` length.
const ENVELOPE_OVERHEAD: usize = 4 + 8;

/// Largest payload that still fits in one message.
pub const MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE - ENVELOPE_OVERHEAD;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode: {0}")]
    Encode(#[source] bincode::Error),
    #[error("Failed to decode: {0}")]
    Decode(#[source] bincode::Error),
    #[error("Message too large ({size} > {max} bytes)")]
    TooLarge { size: u64, max: usize },
}

pub(crate) fn check_size(size: u64, max: usize) -> Result<(), CodecError> {
    if size > max as u64 {
        return Err(CodecError::TooLarge { size, max });
    }
    Ok(())
}

/// Type tag of a wire message.
///
/// Only a handful of these are handled by the handshake; the rest exist
/// in the shared schema and are ignored on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum MessageType {
    Undefined,
    DiscHello,
    DiscDisconnect,
    DiscGetPeers,
    DiscPeers,
    DiscNewMsg,
    ChainStatus,
    ChainTransactions,
    ChainGetTransactions,
    ChainQuery,
    /// A tag outside the pinned set
    Unknown(i32),
}

impl MessageType {
    /// Numeric tag used on the wire.
    pub fn tag(&self) -> i32 {
        match self {
            Self::Undefined => 0,
            Self::DiscHello => 1,
            Self::DiscDisconnect => 2,
            Self::DiscGetPeers => 3,
            Self::DiscPeers => 4,
            Self::DiscNewMsg => 5,
            Self::ChainStatus => 6,
            Self::ChainTransactions => 7,
            Self::ChainGetTransactions => 8,
            Self::ChainQuery => 9,
            Self::Unknown(tag) => *tag,
        }
    }
}

impl From<i32> for MessageType {
    fn from(tag: i32) -> Self {
        match tag {
            0 => Self::Undefined,
            1 => Self::DiscHello,
            2 => Self::DiscDisconnect,
            3 => Self::DiscGetPeers,
            4 => Self::DiscPeers,
            5 => Self::DiscNewMsg,
            6 => Self::ChainStatus,
            7 => Self::ChainTransactions,
            8 => Self::ChainGetTransactions,
            9 => Self::ChainQuery,
            other => Self::Unknown(other),
        }
    }
}

impl From<MessageType> for i32 {
    fn from(msg_type: MessageType) -> Self {
        msg_type.tag()
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "UNDEFINED",
            Self::DiscHello => "DISC_HELLO",
            Self::DiscDisconnect => "DISC_DISCONNECT",
            Self::DiscGetPeers => "DISC_GET_PEERS",
            Self::DiscPeers => "DISC_PEERS",
            Self::DiscNewMsg => "DISC_NEWMSG",
            Self::ChainStatus => "CHAIN_STATUS",
            Self::ChainTransactions => "CHAIN_TRANSACTIONS",
            Self::ChainGetTransactions => "CHAIN_GET_TRANSACTIONS",
            Self::ChainQuery => "CHAIN_QUERY",
            Self::Unknown(tag) => return write!(f, "UNKNOWN({})", tag),
        };
        f.write_str(name)
    }
}

/// The unit exchanged on a chat stream.
///
/// `payload` is only meaningful for content-bearing types; control
/// messages carry an empty payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Create a control message with an empty payload.
    pub fn control(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            payload: Vec::new(),
        }
    }

    /// Create a message carrying `payload`.
    pub fn with_payload(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let size = bincode::serialized_size(self).map_err(CodecError::Encode)?;
        check_size(size, MAX_MESSAGE_SIZE)?;
        bincode::serialize(self).map_err(CodecError::Encode)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        check_size(data.len() as u64, MAX_MESSAGE_SIZE)?;
        bincode::deserialize(data).map_err(CodecError::Decode)
    }
}
