//! Shared helpers for unit tests: in-memory WebSocket pairs and readers.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::config::ChatSettings;
use crate::connection::Connection;

pub(crate) type Peer = WebSocketStream<DuplexStream>;

/// Short deadlines so keepalive tests run quickly under paused time
pub(crate) fn test_settings(capacity: usize) -> ChatSettings {
    ChatSettings {
        capacity,
        write_wait: Duration::from_secs(1),
        pong_wait: Duration::from_secs(2),
        ping_period: Duration::from_secs(1),
    }
}

/// Server-side connection plus the client end talking to it
pub(crate) async fn connection_pair() -> (Connection, Peer) {
    connection_pair_with_buffer(64 * 1024).await
}

/// Like `connection_pair`, with `max_buf` bytes of pipe in each direction
pub(crate) async fn connection_pair_with_buffer(max_buf: usize) -> (Connection, Peer) {
    let (server_io, client_io) = tokio::io::duplex(max_buf);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    (Connection::new(server), client)
}

/// Next text frame as JSON, skipping control frames
pub(crate) async fn next_json(peer: &mut Peer) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), peer.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            WsMessage::Text(text) => return serde_json::from_str(&text).expect("invalid JSON"),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Assert no text frame shows up within `wait`
pub(crate) async fn expect_no_message(peer: &mut Peer, wait: Duration) {
    let quiet = tokio::time::timeout(wait, async {
        loop {
            match peer.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(text.to_string()),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await;
    if let Ok(Some(text)) = quiet {
        panic!("unexpected message: {text}");
    }
}

/// Read until the close frame arrives and return it
pub(crate) async fn expect_closed(peer: &mut Peer) -> Option<CloseFrame<'static>> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), peer.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            Some(Ok(WsMessage::Close(frame))) => return frame.map(CloseFrame::into_owned),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}
