//! peer-daemon library: networking for the peer handshake and transaction relay.
//!
//! The `peer` binary is a thin layer over these modules; integration tests
//! drive them directly.

pub mod chat;
pub mod config;
pub mod connector;
pub mod relay;
pub mod server;
pub mod session;
pub mod tls;

// Re-export key types for convenience
pub use chat::{ChatReceiver, ChatSender, WebSocketChat, CHAT_PATH};
pub use config::{Config, PeerConfig, TlsConfig};
pub use connector::{ConnectError, PeerConnection, PeerConnector};
pub use relay::{RelayError, TransactionRelay};
pub use server::PeerServer;
pub use session::{HandshakeSession, InboundTransactions, SessionError};
pub use tls::CredentialsError;
