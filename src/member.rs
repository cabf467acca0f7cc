//! Member actor
//!
//! One `Member` per admitted connection. It owns the connection, runs the
//! write pump and the keepalive timer on its own tasks, and exposes the read
//! loop for the admitting code to drive. Closing can be triggered from the
//! read loop, the write path or the keepalive timer; whichever gets there
//! first performs the teardown and the others become no-ops.

use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::ChatSettings;
use crate::connection::{Connection, WsSink, WsStream};
use crate::error::WriteError;
use crate::message::Message;
use crate::room::ChatRoom;
use crate::types::{MemberId, UserView};

/// Lifecycle of a member
///
/// `Active → Closing → Closed`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Reading and writing
    Active,
    /// Connection shut, leaving the room
    Closing,
    /// Gone from the room
    Closed,
}

/// What ended a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// Peer sent a close frame
    PeerClosed,
    /// Stream ended without a close frame
    Disconnected,
    /// Transport error while reading
    ReadError,
    /// No pong within the pong wait
    ReadTimeout,
    /// A payload could not be encoded or written
    WriteFailed,
    /// Keepalive ping could not be written
    PingFailed,
    /// Closed by the owning code
    Requested,
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CloseCause::PeerClosed => "peer closed",
            CloseCause::Disconnected => "disconnected",
            CloseCause::ReadError => "read error",
            CloseCause::ReadTimeout => "pong timeout",
            CloseCause::WriteFailed => "write failed",
            CloseCause::PingFailed => "ping failed",
            CloseCause::Requested => "requested",
        };
        f.write_str(text)
    }
}

/// Write half plus the lifecycle state, guarded together
struct Outbound {
    state: MemberState,
    sink: WsSink,
}

impl Outbound {
    /// `Active → Closing`. Only the first caller gets `true`.
    fn begin_close(&mut self) -> bool {
        if self.state == MemberState::Active {
            self.state = MemberState::Closing;
            true
        } else {
            false
        }
    }

    async fn send(&mut self, frame: WsMessage, settings: &ChatSettings) -> Result<(), WriteError> {
        match timeout(settings.write_wait, self.sink.send(frame)).await {
            Ok(result) => result.map_err(WriteError::from),
            Err(_) => Err(WriteError::Timeout),
        }
    }
}

/// A joined participant
pub struct Member {
    id: MemberId,
    user: UserView,
    room: Weak<ChatRoom>,
    settings: ChatSettings,
    outbound: Mutex<Outbound>,
    /// Taken by `read_pump`
    inbound: Mutex<Option<WsStream>>,
    /// Feeds the write pump
    outbox: mpsc::UnboundedSender<Arc<Message>>,
    /// Flips to `true` once the connection is shut
    shutdown: watch::Sender<bool>,
}

impl Member {
    /// Take ownership of `connection` and start the write pump and keepalive
    pub(crate) fn spawn(
        connection: Connection,
        user: UserView,
        room: Weak<ChatRoom>,
        settings: ChatSettings,
    ) -> Arc<Self> {
        let (sink, stream) = connection.into_parts();
        let (outbox, queue) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let member = Arc::new(Self {
            id: MemberId::new(),
            user,
            room,
            settings,
            outbound: Mutex::new(Outbound {
                state: MemberState::Active,
                sink,
            }),
            inbound: Mutex::new(Some(stream)),
            outbox,
            shutdown,
        });

        tokio::spawn(Arc::clone(&member).write_pump(queue));
        tokio::spawn(Arc::clone(&member).keepalive());

        member
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    pub fn user(&self) -> &UserView {
        &self.user
    }

    pub async fn state(&self) -> MemberState {
        self.outbound.lock().await.state
    }

    /// True once the connection has been shut
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Queue a broadcast for the write pump. Never blocks.
    pub(crate) fn deliver(&self, message: Arc<Message>) {
        // The pump is gone once the member closed; dropping is the contract.
        let _ = self.outbox.send(message);
    }

    /// Serialize `message` and write it within the write deadline
    ///
    /// Silent no-op on a member that is no longer active. Any failure,
    /// encoding included, closes this member.
    pub async fn write_json(&self, message: &Message) {
        if self.is_closed() {
            return;
        }

        let frame = match encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode message for {}: {}", self.id, e);
                self.close(CloseCause::WriteFailed).await;
                return;
            }
        };

        self.send_frame(frame, CloseCause::WriteFailed).await;
    }

    /// Close the member for `cause`; later calls do nothing
    pub async fn close(&self, cause: CloseCause) {
        let outbound = self.outbound.lock().await;
        self.shut_down(outbound, cause).await;
    }

    /// Read frames until the peer goes away or stops answering pings
    ///
    /// Text frames are relayed to the rest of the room. Each pong pushes the
    /// read deadline out by the pong wait. Runs at most once per member.
    pub async fn read_pump(self: Arc<Self>) {
        let Some(mut stream) = self.inbound.lock().await.take() else {
            warn!("Read pump for {} started twice", self.id);
            return;
        };

        let closed = wait_closed(self.shutdown.subscribe());
        tokio::pin!(closed);

        let mut deadline = Instant::now() + self.settings.pong_wait;

        let cause = loop {
            let frame = tokio::select! {
                _ = &mut closed => {
                    debug!("Read pump for {} stopped, member closed", self.id);
                    return;
                }
                frame = timeout_at(deadline, stream.next()) => frame,
            };

            match frame {
                Err(_) => break CloseCause::ReadTimeout,
                Ok(None) => break CloseCause::Disconnected,
                Ok(Some(Err(e))) => {
                    debug!("Read error for {}: {}", self.id, e);
                    break CloseCause::ReadError;
                }
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    let Some(room) = self.room.upgrade() else {
                        break CloseCause::Disconnected;
                    };
                    debug!("Relaying message from {} in room {}", self.user, room.id());
                    room.broadcast_except(self.id, Message::client(text.to_string(), &self.user));
                }
                Ok(Some(Ok(WsMessage::Pong(_)))) => {
                    deadline = Instant::now() + self.settings.pong_wait;
                }
                Ok(Some(Ok(WsMessage::Close(_)))) => break CloseCause::PeerClosed,
                Ok(Some(Ok(_))) => {
                    // Pings are answered by tungstenite; binary frames are not relayed
                }
            }
        };

        self.close(cause).await;
    }

    /// Write one frame under the member lock; `false` if not delivered
    async fn send_frame(&self, frame: WsMessage, cause: CloseCause) -> bool {
        let mut outbound = self.outbound.lock().await;
        if outbound.state != MemberState::Active {
            return false;
        }

        match outbound.send(frame, &self.settings).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Write to {} failed: {}", self.id, e);
                self.shut_down(outbound, cause).await;
                false
            }
        }
    }

    /// The close transition. Side effects run once, for the first caller.
    async fn shut_down(&self, mut outbound: MutexGuard<'_, Outbound>, cause: CloseCause) {
        if !outbound.begin_close() {
            return;
        }
        // Writers check the flag before the lock, so they skip a slow close
        self.shutdown.send_replace(true);

        let _ = timeout(self.settings.write_wait, outbound.sink.close()).await;
        drop(outbound);

        if let Some(room) = self.room.upgrade() {
            room.remove(self);
        }

        self.outbound.lock().await.state = MemberState::Closed;
        info!("Member {} ({}) closed: {}", self.id, self.user, cause);
    }

    async fn write_pump(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<Arc<Message>>) {
        let closed = wait_closed(self.shutdown.subscribe());
        tokio::pin!(closed);

        loop {
            tokio::select! {
                _ = &mut closed => break,
                next = queue.recv() => match next {
                    Some(message) => self.write_json(&message).await,
                    None => break,
                },
            }
        }
        debug!("Write pump ended for {}", self.id);
    }

    async fn keepalive(self: Arc<Self>) {
        let period = self.settings.ping_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let closed = wait_closed(self.shutdown.subscribe());
        tokio::pin!(closed);

        loop {
            tokio::select! {
                _ = &mut closed => break,
                _ = ticker.tick() => {
                    if !self.send_frame(WsMessage::Ping(Default::default()), CloseCause::PingFailed).await {
                        break;
                    }
                }
            }
        }
        debug!("Keepalive ended for {}", self.id);
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn encode(message: &Message) -> Result<WsMessage, WriteError> {
    Ok(WsMessage::Text(serde_json::to_string(message)?.into()))
}

async fn wait_closed(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}
