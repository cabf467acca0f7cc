//! Upgraded WebSocket connection handed to the core
//!
//! Splits a `WebSocketStream` into its write and read halves and erases the
//! transport type, so rooms and members don't care whether the bytes come
//! from a TCP socket or an in-memory pipe.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

/// Write half of a connection
pub type WsSink = Pin<Box<dyn Sink<WsMessage, Error = WsError> + Send>>;

/// Read half of a connection
pub type WsStream = Pin<Box<dyn Stream<Item = Result<WsMessage, WsError>> + Send>>;

/// A live, already-upgraded WebSocket connection
pub struct Connection {
    sink: WsSink,
    stream: WsStream,
}

impl Connection {
    /// Wrap an upgraded WebSocket stream
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split::<WsMessage>();
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Read the next frame, or `None` if nothing arrived within `wait`
    pub async fn next_frame(&mut self, wait: Duration) -> Option<Result<WsMessage, WsError>> {
        timeout(wait, self.stream.next()).await.ok().flatten()
    }

    /// Send a close frame and shut the connection down
    ///
    /// Used to turn away a connection that never became a member. Errors
    /// are ignored; the peer may already be gone.
    pub async fn reject(mut self, code: CloseCode, reason: &str, write_wait: Duration) {
        let frame = WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        }));
        let _ = timeout(write_wait, self.sink.send(frame)).await;
        let _ = timeout(write_wait, self.sink.close()).await;
    }

    pub(crate) fn into_parts(self) -> (WsSink, WsStream) {
        (self.sink, self.stream)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}
