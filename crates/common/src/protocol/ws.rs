// WebSocket message types for the waypoint-session.v1 protocol.

use serde::{Deserialize, Serialize};

use crate::types::{ActionKind, LatLng, MapAction, Participant};

/// Request header carrying a guest's durable anonymous identity.
pub const ANONYMOUS_ID_HEADER: &str = "anonymous-id";

/// Client -> server frames in the waypoint-session.v1 protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a map room. `participant_hash` is the client's durable guest
    /// identity hint; ignored for authenticated connections.
    JoinMap {
        map_hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_hash: Option<String>,
    },

    /// Leave a map room on this connection only.
    LeaveMap { map_hash: String },

    /// Create a new action.
    NewAction {
        map_hash: String,
        kind: ActionKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<LatLng>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    /// Update an existing action (last-write-wins at the field level).
    ChangeAction {
        map_hash: String,
        hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<LatLng>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    /// Soft-delete an action.
    DropAction { map_hash: String, hash: String },
}

/// Server -> client frames in the waypoint-session.v1 protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection ack, sent once after transport-level connect and before
    /// any room event is accepted. `anon_id` carries the guest identity
    /// (server-minted when the client supplied none).
    Connected {
        result: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anon_id: Option<String>,
    },

    /// Join response to the caller only: the room snapshot, or empty
    /// arrays when viewing was denied.
    MapState {
        map_hash: String,
        actions: Vec<MapAction>,
        participants: Vec<Participant>,
    },

    /// Room broadcast: a participant joined.
    ParticipantJoin { map_hash: String, participant: Participant },

    /// Leave response to the caller only.
    LeaveAck { map_hash: String, result: bool },

    /// Room broadcast: a participant's last connection left the room.
    ParticipantLeave { map_hash: String, participant_hash: String },

    /// Room broadcast: an action was created.
    NewAction { action: MapAction },

    /// Room broadcast: an action was changed.
    ChangeAction { action: MapAction },

    /// Room broadcast: an action was soft-deleted.
    DropAction { action: MapAction },

    /// Caller-only error.
    Error { code: String, message: String, retryable: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_map_decodes_with_and_without_hint() {
        let with_hint: ClientMessage =
            serde_json::from_str(r#"{"type":"join_map","map_hash":"m1","participant_hash":"p1"}"#)
                .expect("join frame should decode");
        assert_eq!(
            with_hint,
            ClientMessage::JoinMap {
                map_hash: "m1".to_string(),
                participant_hash: Some("p1".to_string()),
            }
        );

        let without_hint: ClientMessage =
            serde_json::from_str(r#"{"type":"join_map","map_hash":"m1"}"#)
                .expect("join frame should decode without hint");
        assert_eq!(
            without_hint,
            ClientMessage::JoinMap { map_hash: "m1".to_string(), participant_hash: None }
        );
    }

    #[test]
    fn new_action_decodes_coordinates_and_data() {
        let frame: ClientMessage = serde_json::from_str(
            r#"{"type":"new_action","map_hash":"m1","kind":"marker","coordinates":{"lat":1.0,"lng":2.0},"data":{"name":"camp"}}"#,
        )
        .expect("new_action frame should decode");

        match frame {
            ClientMessage::NewAction { map_hash, kind, coordinates, data } => {
                assert_eq!(map_hash, "m1");
                assert_eq!(kind, ActionKind::Marker);
                assert_eq!(coordinates, Some(LatLng { lat: 1.0, lng: 2.0 }));
                assert_eq!(data.expect("data should be present")["name"], "camp");
            }
            other => panic!("expected new_action, got {other:?}"),
        }
    }

    #[test]
    fn connected_frame_omits_absent_anon_id() {
        let encoded = serde_json::to_string(&ServerMessage::Connected { result: true, anon_id: None })
            .expect("connected frame should encode");
        assert_eq!(encoded, r#"{"type":"connected","result":true}"#);
    }

    #[test]
    fn error_frame_round_trips() {
        let frame = ServerMessage::Error {
            code: "ACCESS_DENIED".to_string(),
            message: "caller lacks required permission".to_string(),
            retryable: false,
        };
        let encoded = serde_json::to_string(&frame).expect("error frame should encode");
        let decoded: ServerMessage =
            serde_json::from_str(&encoded).expect("error frame should decode");
        assert_eq!(decoded, frame);
    }
}
