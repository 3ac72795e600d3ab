use super::protocol as ws_protocol;
use super::{GatewayState, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES, OUTBOUND_QUEUE_DEPTH};
use crate::auth::{identity_from_headers, ResolvedIdentity};
use crate::error::{ErrorCode, SessionError};
use crate::ws::gateway::SessionGateway;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;
use waypoint_common::protocol::ws::{ClientMessage, ServerMessage};

pub async fn ws_upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Identity is fixed at upgrade time; frames cannot change it later.
    let identity = identity_from_headers(&state.jwt_service, &headers);
    let gateway = state.gateway.clone();
    ws.max_frame_size(MAX_FRAME_BYTES as usize)
        .on_upgrade(move |socket| handle_socket(gateway, identity, socket))
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn handle_socket(
    gateway: Arc<SessionGateway>,
    identity: ResolvedIdentity,
    mut socket: WebSocket,
) {
    let conn = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) =
        mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_DEPTH);

    // The connected ack goes out before any frame is processed.
    let connected = gateway.on_connect(&identity, conn, outbound_sender).await;
    if ws_protocol::send_ws_message(&mut socket, &connected).await.is_err() {
        gateway.on_disconnect(conn).await;
        return;
    }

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if no
    // pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS as u64));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(conn = %conn, identity = %identity.key(), "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if ws_protocol::send_ws_message(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped by the gateway: queue overflow.
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > MAX_FRAME_BYTES as usize {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let inbound = match ws_protocol::decode_message(&raw_message) {
                            Ok(message) => message,
                            Err(error) => {
                                debug!(conn = %conn, error = %error, "undecodable frame");
                                let reply = SessionError::new(
                                    ErrorCode::ValidationFailed,
                                    "invalid websocket frame payload",
                                )
                                .to_server_message();
                                if ws_protocol::send_ws_message(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        if handle_frame(&gateway, conn, inbound, &mut socket).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) if is_frame_size_violation(&error) => {
                        close_frame_too_large(&mut socket).await;
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    gateway.on_disconnect(conn).await;
    let _ = socket.send(Message::Close(None)).await;
}

/// Dispatch one decoded frame. Caller-only replies and error frames go
/// straight down the socket; room broadcasts travel through the outbound
/// queues. `Err` means the socket is gone.
async fn handle_frame(
    gateway: &SessionGateway,
    conn: Uuid,
    inbound: ClientMessage,
    socket: &mut WebSocket,
) -> Result<(), ()> {
    match inbound {
        ClientMessage::JoinMap { map_hash, participant_hash } => {
            match gateway.on_join(conn, &map_hash, participant_hash.as_deref()).await {
                Ok(map_state) => ws_protocol::send_ws_message(socket, &map_state).await,
                Err(error) => {
                    ws_protocol::send_ws_message(socket, &error.to_server_message()).await
                }
            }
        }
        ClientMessage::LeaveMap { map_hash } => {
            let ack = gateway.on_leave(conn, &map_hash).await;
            ws_protocol::send_ws_message(socket, &ack).await
        }
        ClientMessage::NewAction { map_hash, kind, coordinates, data } => {
            match gateway.on_new_action(conn, &map_hash, kind, coordinates, data).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    ws_protocol::send_ws_message(socket, &error.to_server_message()).await
                }
            }
        }
        ClientMessage::ChangeAction { map_hash, hash, coordinates, data } => {
            match gateway.on_change_action(conn, &map_hash, &hash, coordinates, data).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    ws_protocol::send_ws_message(socket, &error.to_server_message()).await
                }
            }
        }
        ClientMessage::DropAction { map_hash, hash } => {
            match gateway.on_drop_action(conn, &map_hash, &hash).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    ws_protocol::send_ws_message(socket, &error.to_server_message()).await
                }
            }
        }
    }
}
