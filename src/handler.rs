//! WebSocket connection handler
//!
//! Turns an incoming TCP connection into a room member: authenticates and
//! resolves the room during the WebSocket handshake, checks the password of
//! private rooms over the first frame, asks the hub for admission and then
//! drives the member's read loop until the connection ends.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::ChatSettings;
use crate::connection::Connection;
use crate::directory::{IdentityProvider, RoomDirectory};
use crate::error::AppError;
use crate::hub::Hub;
use crate::message::{ErrorBody, PasswordFrame};
use crate::types::{RoomId, RoomMeta, UserView};

/// Everything a connection handler needs: the hub and its collaborators
pub struct Gateway {
    hub: Arc<Hub>,
    identities: Arc<dyn IdentityProvider>,
    rooms: Arc<dyn RoomDirectory>,
}

impl Gateway {
    pub fn new(
        hub: Arc<Hub>,
        identities: Arc<dyn IdentityProvider>,
        rooms: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self {
            hub,
            identities,
            rooms,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Resolve the caller and the room from the upgrade request
    ///
    /// Route first, then the bearer token, then the room, matching the order
    /// a router with an auth middleware would apply them.
    fn authorize(&self, request: &Request) -> Result<(UserView, RoomMeta), AppError> {
        let path = request.uri().path();
        let room_id = room_id_from_path(path).ok_or_else(|| AppError::NotFound(path.to_string()))?;

        let user = bearer_token(request)
            .and_then(|token| self.identities.user_for_token(&token))
            .ok_or(AppError::Unauthorized)?;

        let room = self.rooms.room(&room_id)?;
        Ok((user, room))
    }
}

/// Handle a new TCP connection
pub async fn handle_connection(stream: TcpStream, gateway: Arc<Gateway>) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);
    serve(stream, &peer_addr, gateway).await
}

/// Run one connection from handshake to disconnect
///
/// Generic over the transport so tests can drive it over an in-memory pipe.
pub async fn serve<S>(stream: S, peer_addr: &str, gateway: Arc<Gateway>) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut outcome = None;
    let handshake = accept_hdr_async(stream, |request: &Request, response: Response| {
        let result = gateway.authorize(request);
        let reply = match &result {
            Ok(_) => Ok(response),
            Err(e) => Err(error_response(e)),
        };
        outcome = Some(result);
        reply
    })
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            return Err(match outcome {
                Some(Err(rejection)) => rejection,
                _ => e.into(),
            })
        }
    };
    let (user, room) = match outcome {
        Some(Ok(admission)) => admission,
        Some(Err(rejection)) => return Err(rejection),
        None => return Err(AppError::Unauthorized),
    };

    info!("{} connected from {} to room {}", user, peer_addr, room.id);

    let settings = *gateway.hub.settings();
    let mut connection = Connection::new(ws);

    if room.is_private() {
        connection = unlock(connection, &room, &settings).await?;
        info!("{} gained access to room {}", user, room.id);
    }

    let member = match gateway.hub.join(&room, connection, user.clone()) {
        Ok(member) => member,
        Err(full) => {
            info!("Full room join attempt by {} to {}", user, full.room_id);
            let room_id = full.room_id.clone();
            full.connection
                .reject(CloseCode::Policy, "room is full", settings.write_wait)
                .await;
            return Err(AppError::RoomFull(room_id));
        }
    };

    debug!("Member {} created for {}", member.id(), user);
    member.read_pump().await;

    info!("{} disconnected from room {}", user, room.id);
    Ok(())
}

/// Read the password frame of a private room
///
/// Gives the connection back when the password matches. Otherwise the
/// connection is closed with a code telling the client why.
async fn unlock(
    mut connection: Connection,
    room: &RoomMeta,
    settings: &ChatSettings,
) -> Result<Connection, AppError> {
    let payload = loop {
        match connection.next_frame(settings.pong_wait).await {
            None => {
                debug!("No password frame for room {}", room.id);
                return Err(AppError::AccessDenied(room.id.clone()));
            }
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(WsMessage::Text(text))) => break text.to_string().into_bytes(),
            Some(Ok(WsMessage::Binary(data))) => break data.to_vec(),
            Some(Ok(WsMessage::Close(_))) => {
                connection
                    .reject(CloseCode::Normal, "", settings.write_wait)
                    .await;
                return Err(AppError::AccessDenied(room.id.clone()));
            }
            Some(Ok(_)) => continue,
        }
    };

    let frame: PasswordFrame = match serde_json::from_slice(&payload) {
        Ok(frame) => frame,
        Err(e) => {
            info!("Unreadable password frame for room {}: {}", room.id, e);
            connection
                .reject(CloseCode::Invalid, "failed to grant access", settings.write_wait)
                .await;
            return Err(e.into());
        }
    };

    if room.password.as_deref() != Some(frame.password.as_str()) {
        warn!("Invalid password for room {}", room.id);
        connection
            .reject(CloseCode::Policy, "wrong password", settings.write_wait)
            .await;
        return Err(AppError::AccessDenied(room.id.clone()));
    }

    Ok(connection)
}

/// `/rooms/{room_id}/chat`
fn room_id_from_path(path: &str) -> Option<RoomId> {
    let id = path.strip_prefix("/rooms/")?.strip_suffix("/chat")?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(RoomId(id.to_string()))
}

/// `Authorization: Bearer <token>`, or `?token=<token>` for browsers that
/// can't set headers on a WebSocket upgrade
fn bearer_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(AUTHORIZATION) {
        return value
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(str::to_string);
    }
    request
        .uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// HTTP reply for a handshake refused before the upgrade
fn error_response(err: &AppError) -> ErrorResponse {
    let (status, message) = match err {
        AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "you are not authorized"),
        AppError::RoomNotFound(_) => (StatusCode::NOT_FOUND, "room is not found"),
        AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not found"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "unexpected error"),
    };
    let mut response = ErrorResponse::new(serde_json::to_string(&ErrorBody::new(message)).ok());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::SinkExt;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Error as WsError;

    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::testing::{expect_closed, expect_no_message, next_json, test_settings, Peer};

    fn gateway(capacity: usize) -> Arc<Gateway> {
        let mut directory = MemoryDirectory::new();
        directory.insert_user("tok-a", UserView::new(1, "alice"));
        directory.insert_user("tok-b", UserView::new(2, "bob"));
        directory.insert_user("tok-c", UserView::new(3, "carol"));
        directory.insert_room(RoomMeta::new("lobby", "Lobby", 1));
        directory.insert_room(RoomMeta::new("vault", "Vault", 1).with_password("hunter2"));
        let directory = Arc::new(directory);

        Arc::new(Gateway::new(
            Hub::new(test_settings(capacity)),
            directory.clone(),
            directory,
        ))
    }

    async fn dial(
        gateway: &Arc<Gateway>,
        path: &str,
        token: Option<&str>,
    ) -> (Result<Peer, WsError>, JoinHandle<Result<(), AppError>>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(serve(server_io, "test", Arc::clone(gateway)));

        let mut request = format!("ws://localhost{path}").into_client_request().unwrap();
        if let Some(token) = token {
            request.headers_mut().insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            );
        }
        let client = tokio_tungstenite::client_async(request, client_io)
            .await
            .map(|(ws, _)| ws);
        (client, server)
    }

    /// Wait until the server side has admitted `count` members to `room`
    async fn settle(gateway: &Arc<Gateway>, room: &str, count: usize) {
        let id = RoomId::from(room);
        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.hub().room(&id).map(|r| r.len()) != Some(count) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("members never settled");
    }

    fn http_status(result: Result<Peer, WsError>) -> StatusCode {
        match result {
            Err(WsError::Http(response)) => response.status(),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("handshake should have been refused"),
        }
    }

    #[test]
    fn test_room_id_from_path() {
        assert_eq!(room_id_from_path("/rooms/lobby/chat"), Some(RoomId::from("lobby")));
        assert_eq!(room_id_from_path("/rooms//chat"), None);
        assert_eq!(room_id_from_path("/rooms/a/b/chat"), None);
        assert_eq!(room_id_from_path("/chat"), None);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let gateway = gateway(4);
        let (client, server) = dial(&gateway, "/rooms/lobby/chat", None).await;

        assert_eq!(http_status(client), StatusCode::UNAUTHORIZED);
        assert!(matches!(server.await.unwrap(), Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let gateway = gateway(4);
        let (client, _server) = dial(&gateway, "/rooms/lobby/chat", Some("forged")).await;
        assert_eq!(http_status(client), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_query_token_is_accepted() {
        let gateway = gateway(4);
        let (client, _server) = dial(&gateway, "/rooms/lobby/chat?token=tok-a", None).await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found() {
        let gateway = gateway(4);
        let (client, server) = dial(&gateway, "/rooms/attic/chat", Some("tok-a")).await;

        assert_eq!(http_status(client), StatusCode::NOT_FOUND);
        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::RoomNotFound(_)));
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let gateway = gateway(4);
        let (client, _server) = dial(&gateway, "/lobby", Some("tok-a")).await;
        assert_eq!(http_status(client), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_public_room_chat() {
        let gateway = gateway(4);
        let (alice, _) = dial(&gateway, "/rooms/lobby/chat", Some("tok-a")).await;
        let mut alice = alice.unwrap();
        settle(&gateway, "lobby", 1).await;
        let (bob, _) = dial(&gateway, "/rooms/lobby/chat", Some("tok-b")).await;
        let mut bob = bob.unwrap();

        assert_eq!(next_json(&mut alice).await["message"], "bob has joined the chat");
        assert_eq!(next_json(&mut bob).await["message"], "bob has joined the chat");

        alice.send(WsMessage::Text("hi".into())).await.unwrap();
        let value = next_json(&mut bob).await;
        assert_eq!(value["type"], "client");
        assert_eq!(value["from"]["username"], "alice");
        expect_no_message(&mut alice, Duration::from_millis(100)).await;

        bob.close(None).await.unwrap();
        assert_eq!(next_json(&mut alice).await["message"], "bob has left the chat");
    }

    #[tokio::test]
    async fn test_full_room_closes_with_policy() {
        let gateway = gateway(1);
        let (alice, _) = dial(&gateway, "/rooms/lobby/chat", Some("tok-a")).await;
        let _alice = alice.unwrap();
        settle(&gateway, "lobby", 1).await;
        let (bob, server) = dial(&gateway, "/rooms/lobby/chat", Some("tok-b")).await;
        let mut bob = bob.unwrap();

        let frame = expect_closed(&mut bob).await.unwrap();
        assert_eq!(frame.code, CloseCode::Policy);
        assert_eq!(frame.reason, "room is full");
        assert!(matches!(server.await.unwrap(), Err(AppError::RoomFull(_))));

        let room = gateway.hub().room(&RoomId::from("lobby")).unwrap();
        assert_eq!(room.len(), 1);
    }

    #[tokio::test]
    async fn test_private_room_wrong_password() {
        let gateway = gateway(4);
        let (client, server) = dial(&gateway, "/rooms/vault/chat", Some("tok-a")).await;
        let mut client = client.unwrap();

        client
            .send(WsMessage::Text(r#"{"password":"guess"}"#.into()))
            .await
            .unwrap();

        let frame = expect_closed(&mut client).await.unwrap();
        assert_eq!(frame.code, CloseCode::Policy);
        assert_eq!(frame.reason, "wrong password");
        assert!(matches!(server.await.unwrap(), Err(AppError::AccessDenied(_))));
        assert_eq!(gateway.hub().room_count(), 0);
    }

    #[tokio::test]
    async fn test_private_room_garbled_password() {
        let gateway = gateway(4);
        let (client, server) = dial(&gateway, "/rooms/vault/chat", Some("tok-a")).await;
        let mut client = client.unwrap();

        client.send(WsMessage::Text("hunter2".into())).await.unwrap();

        let frame = expect_closed(&mut client).await.unwrap();
        assert_eq!(frame.code, CloseCode::Invalid);
        assert_eq!(frame.reason, "failed to grant access");
        assert!(matches!(server.await.unwrap(), Err(AppError::Json(_))));
    }

    #[tokio::test]
    async fn test_private_room_right_password() {
        let gateway = gateway(4);
        let (alice, _) = dial(&gateway, "/rooms/vault/chat", Some("tok-a")).await;
        let mut alice = alice.unwrap();
        alice
            .send(WsMessage::Text(r#"{"password":"hunter2"}"#.into()))
            .await
            .unwrap();
        settle(&gateway, "vault", 1).await;

        let (bob, _) = dial(&gateway, "/rooms/vault/chat", Some("tok-b")).await;
        let mut bob = bob.unwrap();
        bob.send(WsMessage::Text(r#"{"password":"hunter2"}"#.into()))
            .await
            .unwrap();

        assert_eq!(next_json(&mut alice).await["message"], "bob has joined the chat");
        assert_eq!(next_json(&mut bob).await["message"], "bob has joined the chat");
    }
}
