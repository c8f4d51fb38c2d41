// WebSocket handler: game state streaming and remote participation.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};

use super::AppState;
use crate::engine::server::{GameServer, JoinTicket};
use crate::metrics;
use crate::protocol::{ClientMessage, ErrorCode, Payload, ProtocolError, ServerMessage};

/// WebSocket upgrade handler for game state streaming.
pub async fn ws_game(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Per-connection state.
#[derive(Default)]
pub struct ClientSession {
    ticket: Option<JoinTicket>,
    session_id: Option<String>,
}

impl ClientSession {
    pub fn participant_id(&self) -> Option<u32> {
        self.ticket.as_ref().map(|t| t.participant_id)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Drop a ticket whose game has ended or been replaced.
    fn forget_stale_ticket(&mut self, server: &GameServer) {
        if let Some(ticket) = &self.ticket {
            if !server.holds_current(ticket) {
                tracing::debug!(participant_id = ticket.participant_id, "Dropping ticket from a finished game");
                self.ticket = None;
                self.session_id = None;
            }
        }
    }
}

/// What to do after handling one inbound frame.
#[derive(Debug, Default, PartialEq)]
pub struct FrameOutcome {
    pub replies: Vec<ServerMessage>,
    /// Close the connection after sending the replies.
    pub close: bool,
}

impl FrameOutcome {
    fn reply(message: ServerMessage) -> Self {
        Self {
            replies: vec![message],
            close: false,
        }
    }
}

fn error_reply(code: ErrorCode, detail: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        code,
        detail: detail.into(),
    }
}

/// Decode one client frame and act on it.
pub async fn handle_client_frame(
    server: &GameServer,
    session: &mut ClientSession,
    bytes: &[u8],
) -> FrameOutcome {
    let message = match server.codec().decode_client_message(bytes) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                participant_id = ?session.participant_id(),
                reason = e.reason(),
                "Rejected client frame: {e}"
            );
            // A peer on an unknown protocol version cannot be trusted to
            // understand anything else we send; it has to reconnect.
            let close = matches!(e, ProtocolError::UnsupportedVersion { .. });
            return FrameOutcome {
                replies: vec![error_reply(e.code(), e.to_string())],
                close,
            };
        }
    };

    session.forget_stale_ticket(server);

    match message {
        ClientMessage::Join { name, team } => {
            if session.ticket.is_some() {
                return FrameOutcome::reply(ServerMessage::JoinRejected {
                    reason: "Already joined".into(),
                });
            }
            match server.join(&name, team).await {
                Ok(ticket) => {
                    let session_id = uuid::Uuid::new_v4().to_string();
                    let participant_id = ticket.participant_id;
                    tracing::info!(participant_id, session_id = %session_id, "Client joined as '{name}'");
                    session.ticket = Some(ticket);
                    session.session_id = Some(session_id.clone());
                    FrameOutcome::reply(ServerMessage::JoinAccepted {
                        participant_id,
                        session_id,
                    })
                }
                Err(reason) => FrameOutcome::reply(ServerMessage::JoinRejected { reason }),
            }
        }
        ClientMessage::Command { tick, command } => match &session.ticket {
            Some(ticket) => {
                tracing::trace!(participant_id = ticket.participant_id, tick, "Command received");
                if !ticket.inbox.submit(command) {
                    tracing::warn!(participant_id = ticket.participant_id, "Command inbox unusable");
                }
                FrameOutcome::default()
            }
            None => FrameOutcome::reply(error_reply(ErrorCode::NotJoined, "Join before sending commands")),
        },
        ClientMessage::Heartbeat { nonce } => FrameOutcome::reply(ServerMessage::Pong { nonce }),
        ClientMessage::Leave => match session.ticket.take() {
            Some(ticket) => {
                server.leave(&ticket);
                session.session_id = None;
                FrameOutcome::default()
            }
            None => FrameOutcome::reply(error_reply(ErrorCode::NotJoined, "Not joined")),
        },
    }
}

async fn send_payload(socket: &mut WebSocket, payload: Payload) -> Result<(), axum::Error> {
    let message = if payload.is_text() {
        match String::from_utf8(payload.into_bytes()) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        }
    } else {
        Message::Binary(payload.into_bytes().into())
    };
    socket.send(message).await?;
    metrics::WEBSOCKET_MESSAGES_SENT_TOTAL.inc();
    Ok(())
}

async fn send_message(
    socket: &mut WebSocket,
    server: &GameServer,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match server.codec().encode_server_message(message) {
        Ok(payload) => send_payload(socket, payload).await,
        Err(e) => {
            tracing::error!(kind = message.kind(), "Failed to encode reply: {e}");
            Ok(())
        }
    }
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    metrics::CONNECTED_WEBSOCKETS.inc();
    let server = state.game_server.clone();
    let mut session = ClientSession::default();

    run_session(&mut socket, &server, &mut session).await;

    if let Some(ticket) = &session.ticket {
        server.leave(ticket);
    }
    metrics::CONNECTED_WEBSOCKETS.dec();
}

async fn run_session(socket: &mut WebSocket, server: &GameServer, session: &mut ClientSession) {
    let mut rx = server.subscribe();

    match server.welcome() {
        Ok(welcome) => {
            if send_payload(socket, welcome).await.is_err() {
                return;
            }
        }
        Err(e) => {
            tracing::error!("Failed to encode welcome: {e}");
            return;
        }
    }

    // Send the latest state so late joiners can render immediately.
    if let Some(state) = server.latest_state() {
        if send_payload(socket, state).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(payload) => {
                        if send_payload(socket, payload).await.is_err() {
                            // Client disconnected
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket client lagged, skipped {n} messages");
                    }
                }
            }
            result = socket.recv() => {
                let bytes = match result {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket receive error: {e}");
                        break;
                    }
                    // Ping/pong frames are handled by the transport
                    Some(Ok(_)) => continue,
                };

                let outcome = handle_client_frame(server, session, &bytes).await;
                for reply in &outcome.replies {
                    if send_message(socket, server, reply).await.is_err() {
                        return;
                    }
                }
                if outcome.close {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
}
