//! Chat streams over WebSocket.
//!
//! The `Chat` operation is a WebSocket on `/chat`; each wire message is
//! one binary frame. A `WebSocketChat` can be driven directly through
//! `ChatStream` or split into a sender and a receiver for concurrent use.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use peer_core::protocol::MAX_MESSAGE_SIZE;
use peer_core::{ChatStream, StreamError, WireMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    tungstenite::{protocol::WebSocketConfig, Error as WsError, Message},
    WebSocketStream,
};

/// Request path of the chat stream.
pub const CHAT_PATH: &str = "/chat";

/// WebSocket limits for chat streams: one message of up to
/// `MAX_MESSAGE_SIZE`, sent as a single frame.
pub fn websocket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

/// A chat stream backed by a WebSocket.
pub struct WebSocketChat<S> {
    ws: WebSocketStream<S>,
}

impl<S> WebSocketChat<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }

    /// Split into independently usable send and receive halves.
    pub fn split(self) -> (ChatSender<S>, ChatReceiver<S>) {
        let (sink, stream) = self.ws.split();
        (ChatSender { sink }, ChatReceiver { stream })
    }

}

#[async_trait]
impl<S> ChatStream for WebSocketChat<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, msg: WireMessage) -> Result<(), StreamError> {
        send_message(&mut self.ws, msg).await
    }

    async fn recv(&mut self) -> Result<Option<WireMessage>, StreamError> {
        recv_message(&mut self.ws).await
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(StreamError::Send(e.to_string())),
        }
    }
}

/// Sending half of a split chat.
pub struct ChatSender<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> ChatSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub async fn send(&mut self, msg: WireMessage) -> Result<(), StreamError> {
        send_message(&mut self.sink, msg).await
    }

    /// Close our sending side (sends a close frame).
    pub async fn close(&mut self) -> Result<(), StreamError> {
        self.sink
            .close()
            .await
            .map_err(|e| StreamError::Send(e.to_string()))
    }
}

/// Receiving half of a split chat.
pub struct ChatReceiver<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> ChatReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Receive the next message; `Ok(None)` at end-of-input.
    pub async fn recv(&mut self) -> Result<Option<WireMessage>, StreamError> {
        recv_message(&mut self.stream).await
    }
}

async fn send_message<Si>(sink: &mut Si, msg: WireMessage) -> Result<(), StreamError>
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let data = msg.encode()?;
    sink.send(Message::Binary(data.into()))
        .await
        .map_err(|e| StreamError::Send(e.to_string()))
}

async fn recv_message<St>(stream: &mut St) -> Result<Option<WireMessage>, StreamError>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        // Oversized messages are rejected by the WebSocket layer
        let data = match stream.next().await {
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Frame(_))) => continue,
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                return Ok(None)
            }
            Some(Err(e)) => return Err(StreamError::Receive(e.to_string())),
            None => return Ok(None),
        };

        return Ok(Some(WireMessage::decode(&data)?));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peer_core::MessageType;
    use tokio::io::{duplex, DuplexStream};
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (WebSocketChat<DuplexStream>, WebSocketChat<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, Some(websocket_config())).await;
        let server = WebSocketStream::from_raw_socket(b, Role::Server, Some(websocket_config())).await;
        (WebSocketChat::new(client), WebSocketChat::new(server))
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let (mut client, mut server) = pair().await;

        client
            .send(WireMessage::control(MessageType::DiscHello))
            .await
            .unwrap();
        client
            .send(WireMessage::with_payload(
                MessageType::ChainTransactions,
                vec![1, 2],
            ))
            .await
            .unwrap();

        let first = server.recv().await.unwrap().unwrap();
        let second = server.recv().await.unwrap().unwrap();
        assert_eq!(first, WireMessage::control(MessageType::DiscHello));
        assert_eq!(second.msg_type, MessageType::ChainTransactions);
        assert_eq!(second.payload, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_close_is_end_of_input() {
        let (mut client, mut server) = pair().await;

        client.close().await.unwrap();
        assert!(server.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_split_halves() {
        let (client, mut server) = pair().await;
        let (mut sender, mut receiver) = client.split();

        sender
            .send(WireMessage::control(MessageType::DiscGetPeers))
            .await
            .unwrap();
        let request = server.recv().await.unwrap().unwrap();
        assert_eq!(request.msg_type, MessageType::DiscGetPeers);

        server
            .send(WireMessage::control(MessageType::DiscPeers))
            .await
            .unwrap();
        let reply = receiver.recv().await.unwrap().unwrap();
        assert_eq!(reply.msg_type, MessageType::DiscPeers);

        sender.close().await.unwrap();
        assert!(server.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_completes_peer_close() {
        let (a, b) = duplex(64 * 1024);
        let mut raw = WebSocketStream::from_raw_socket(a, Role::Client, Some(websocket_config())).await;
        let mut server =
            WebSocketChat::new(WebSocketStream::from_raw_socket(b, Role::Server, Some(websocket_config())).await);

        raw.close(None).await.unwrap();
        assert!(server.recv().await.unwrap().is_none());
        server.close().await.unwrap();
        drop(server);

        // The peer sees our close reply, not a reset
        assert!(matches!(raw.next().await, Some(Ok(Message::Close(_)))));
    }

    #[tokio::test]
    async fn test_message_larger_than_default_frame_limit() {
        let (mut client, mut server) = pair().await;
        let payload = vec![7u8; 20 * 1024 * 1024];

        let (sent, received) = tokio::join!(
            client.send(WireMessage::with_payload(
                MessageType::ChainTransactions,
                payload.clone(),
            )),
            server.recv()
        );

        sent.unwrap();
        assert_eq!(received.unwrap().unwrap().payload, payload);
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_malformed() {
        let (a, b) = duplex(64 * 1024);
        let mut raw = WebSocketStream::from_raw_socket(a, Role::Client, Some(websocket_config())).await;
        let mut server =
            WebSocketChat::new(WebSocketStream::from_raw_socket(b, Role::Server, Some(websocket_config())).await);

        raw.send(Message::Binary(vec![0xFF].into())).await.unwrap();

        assert!(matches!(
            server.recv().await,
            Err(StreamError::Malformed(_))
        ));
    }
}
