use axum::extract::ws::{Message, WebSocket};
use waypoint_common::protocol::ws::{ClientMessage, ServerMessage};

pub fn decode_message(raw: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str::<ClientMessage>(raw)
}

pub fn encode_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub async fn send_ws_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
