//! Transaction batches carried by `CHAIN_TRANSACTIONS` messages.
//!
//! The batch is opaque to the protocol: the relay serializes it into a
//! message payload and the receiving session decodes it back.

use crate::protocol::message::check_size;
use crate::protocol::{CodecError, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};

/// A single transaction as produced upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier
    pub id: String,
    /// Opaque transaction body
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

/// An ordered collection of transactions sent as one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBatch {
    pub transactions: Vec<Transaction>,
}

impl TransactionBatch {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Identifiers in batch order.
    pub fn ids(&self) -> Vec<&str> {
        self.transactions.iter().map(|tx| tx.id.as_str()).collect()
    }

    /// Serialize into a `CHAIN_TRANSACTIONS` payload.
    ///
    /// Fails with `CodecError::TooLarge` if the batch would not fit in one
    /// message.
    pub fn to_payload(&self) -> Result<Vec<u8>, CodecError> {
        let size = bincode::serialized_size(self).map_err(CodecError::Encode)?;
        check_size(size, MAX_PAYLOAD_SIZE)?;
        bincode::serialize(self).map_err(CodecError::Encode)
    }

    /// Parse a `CHAIN_TRANSACTIONS` payload.
    pub fn from_payload(data: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(data).map_err(CodecError::Decode)
    }
}
