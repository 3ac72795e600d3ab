//! Session gateway: the behavior behind every WebSocket frame.
//!
//! One instance is shared by all connections. Socket-loop plumbing lives
//! in [`super::handler`]; everything here is transport-free so the unit
//! tests drive it with plain channels.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use waypoint_common::protocol::ws::ServerMessage;
use waypoint_common::types::{ActionKind, ActionStatus, LatLng, MapAction, MapPermissionPolicy};

use crate::auth::ResolvedIdentity;
use crate::cache::TtlCache;
use crate::error::{ErrorCode, SessionError};
use crate::participants::{store_call, IdentityRef, ParticipantResolver};
use crate::permissions;
use crate::registry::{ConnId, ConnectionRegistry, PresenceTransition};
use crate::rooms::RoomMembership;
use crate::store::{ActionStore, PolicyStore, Stores};

/// How long an identity counts as online after its last presence refresh.
const PRESENCE_TTL: Duration = Duration::from_secs(60 * 60);

pub struct SessionGateway {
    registry: ConnectionRegistry,
    rooms: RoomMembership,
    resolver: ParticipantResolver,
    policies: PolicyStore,
    actions: ActionStore,
    presence: TtlCache<String, bool>,
}

impl SessionGateway {
    pub fn new(stores: Stores) -> Self {
        Self {
            registry: ConnectionRegistry::default(),
            rooms: RoomMembership::default(),
            resolver: ParticipantResolver::new(stores.maps, stores.participants),
            policies: stores.policies,
            actions: stores.actions,
            presence: TtlCache::new(),
        }
    }

    /// Register a fresh connection and build its `connected` ack. Guests
    /// get their (possibly server-minted) anonymous id echoed back so the
    /// client can persist it.
    pub async fn on_connect(
        &self,
        identity: &ResolvedIdentity,
        conn: ConnId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> ServerMessage {
        let transition =
            self.registry.register(identity.key(), identity.logged_in(), conn, sender).await;
        if transition == PresenceTransition::CameOnline {
            self.presence.set(presence_key(identity.key()), true, PRESENCE_TTL).await;
        }

        let anon_id = match identity {
            ResolvedIdentity::Anonymous { anon_id, .. } => Some(anon_id.clone()),
            ResolvedIdentity::User { .. } => None,
        };
        ServerMessage::Connected { result: true, anon_id }
    }

    /// Handle a `join_map` frame. Returns the caller-only `map_state`
    /// response; announces the join to the whole room (the caller
    /// included) when this participant newly entered it.
    ///
    /// A caller without view permission gets an *empty* snapshot instead
    /// of an error, so room existence and population are not leaked.
    pub async fn on_join(
        &self,
        conn: ConnId,
        map_hash: &str,
        participant_hint: Option<&str>,
    ) -> Result<ServerMessage, SessionError> {
        let identity = self.identity_ref(conn, participant_hint).await?;
        let (participant, _created) =
            self.resolver.resolve(map_hash, &identity).await.map_err(SessionError::fail_closed)?;
        let policy = self.policy_for(map_hash).await.map_err(SessionError::fail_closed)?;

        let effective = permissions::compute(&participant, &policy);
        if !effective.view {
            debug!(map_hash, participant_hash = %participant.participant_hash, "join without view permission");
            return Ok(ServerMessage::MapState {
                map_hash: map_hash.to_string(),
                actions: Vec::new(),
                participants: Vec::new(),
            });
        }

        let newly_present = self.rooms.join(&participant.participant_hash, map_hash, conn).await;
        if newly_present {
            self.broadcast_to_room(
                map_hash,
                ServerMessage::ParticipantJoin {
                    map_hash: map_hash.to_string(),
                    participant: participant.clone(),
                },
            )
            .await;
        }

        let actions = store_call(self.actions.live_actions(map_hash)).await?;
        let participant_hashes = self.rooms.participants_of(map_hash).await;
        let participants =
            self.resolver.participants_for(map_hash, &participant_hashes).await?;

        Ok(ServerMessage::MapState { map_hash: map_hash.to_string(), actions, participants })
    }

    /// Handle a `leave_map` frame. The ack always succeeds; the room-wide
    /// `participant_leave` fires only when this connection was the
    /// participant's last one in the room.
    pub async fn on_leave(&self, conn: ConnId, map_hash: &str) -> ServerMessage {
        if let Some(participant_hash) = self.rooms.participant_of(conn).await {
            let evicted = self.rooms.leave(&participant_hash, map_hash, conn).await;
            if evicted {
                self.broadcast_to_room(
                    map_hash,
                    ServerMessage::ParticipantLeave {
                        map_hash: map_hash.to_string(),
                        participant_hash,
                    },
                )
                .await;
            }
        }

        ServerMessage::LeaveAck { map_hash: map_hash.to_string(), result: true }
    }

    /// Handle a `new_action` frame: validate, authorize, persist, then
    /// broadcast. The caller sees the action through the room broadcast
    /// like everyone else.
    pub async fn on_new_action(
        &self,
        conn: ConnId,
        map_hash: &str,
        kind: ActionKind,
        coordinates: Option<LatLng>,
        data: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        validate_coordinates(coordinates)?;

        let effective = self.authorize(conn, map_hash).await?;
        if !effective.permissions.add_actions {
            return Err(SessionError::from_code(ErrorCode::AccessDenied));
        }

        let action = MapAction {
            hash: Uuid::new_v4().simple().to_string(),
            map_hash: map_hash.to_string(),
            kind,
            lat: coordinates.map(|c| c.lat),
            lng: coordinates.map(|c| c.lng),
            data,
            creator_hash: effective.participant_hash,
            status: ActionStatus::Live,
            version: 1,
            created_at: chrono::Utc::now(),
            deleted_at: None,
        };
        store_call(self.actions.insert(&action)).await?;

        self.broadcast_to_room(map_hash, ServerMessage::NewAction { action }).await;
        Ok(())
    }

    /// Handle a `change_action` frame. Field-level last-write-wins:
    /// absent fields keep their stored value.
    pub async fn on_change_action(
        &self,
        conn: ConnId,
        map_hash: &str,
        hash: &str,
        coordinates: Option<LatLng>,
        data: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        validate_coordinates(coordinates)?;

        let effective = self.authorize(conn, map_hash).await?;
        if !effective.permissions.edit_actions {
            return Err(SessionError::from_code(ErrorCode::AccessDenied));
        }

        let action = store_call(self.actions.update(map_hash, hash, coordinates, data))
            .await?
            .ok_or_else(|| SessionError::from_code(ErrorCode::NotFound))?;

        self.broadcast_to_room(map_hash, ServerMessage::ChangeAction { action }).await;
        Ok(())
    }

    /// Handle a `drop_action` frame (soft delete).
    pub async fn on_drop_action(
        &self,
        conn: ConnId,
        map_hash: &str,
        hash: &str,
    ) -> Result<(), SessionError> {
        let effective = self.authorize(conn, map_hash).await?;
        if !effective.permissions.drop_actions {
            return Err(SessionError::from_code(ErrorCode::AccessDenied));
        }

        let action = store_call(self.actions.soft_delete(map_hash, hash))
            .await?
            .ok_or_else(|| SessionError::from_code(ErrorCode::NotFound))?;

        self.broadcast_to_room(map_hash, ServerMessage::DropAction { action }).await;
        Ok(())
    }

    /// Tear down all state of a closed connection: room memberships first
    /// (announcing evictions), then registry and presence.
    pub async fn on_disconnect(&self, conn: ConnId) {
        for (room, participant_hash) in self.rooms.disconnect(conn).await {
            self.broadcast_to_room(
                &room,
                ServerMessage::ParticipantLeave { map_hash: room.clone(), participant_hash },
            )
            .await;
        }

        if let Some((identity, transition)) = self.registry.unregister(conn).await {
            if transition == PresenceTransition::WentOffline {
                self.presence.remove(&presence_key(&identity.identity)).await;
            }
        }
    }

    /// Whether any connection of this identity is currently registered.
    pub async fn identity_online(&self, identity: &str) -> bool {
        self.presence.get(&presence_key(identity)).await.unwrap_or(false)
    }

    /// Resolve the acting participant and its effective permissions for a
    /// mutation on `map_hash`. Store failures become denials.
    async fn authorize(
        &self,
        conn: ConnId,
        map_hash: &str,
    ) -> Result<AuthorizedParticipant, SessionError> {
        let identity = self.identity_ref(conn, None).await?;
        let (participant, _created) =
            self.resolver.resolve(map_hash, &identity).await.map_err(SessionError::fail_closed)?;
        let policy = self.policy_for(map_hash).await.map_err(SessionError::fail_closed)?;
        let permissions = permissions::compute(&participant, &policy);

        Ok(AuthorizedParticipant { participant_hash: participant.participant_hash, permissions })
    }

    /// Build the resolver identity for a connection. Authenticated
    /// callers act under their user hash; guests act under the join hint
    /// when given, falling back to the participant they last joined as,
    /// then to their anonymous id.
    async fn identity_ref(
        &self,
        conn: ConnId,
        participant_hint: Option<&str>,
    ) -> Result<IdentityRef, SessionError> {
        let identity = self
            .registry
            .identity_of(conn)
            .await
            .ok_or_else(|| SessionError::from_code(ErrorCode::InternalError))?;

        if identity.logged_in {
            return Ok(IdentityRef::user(identity.identity));
        }

        if let Some(hint) = participant_hint {
            return Ok(IdentityRef::guest(hint));
        }
        if let Some(participant_hash) = self.rooms.participant_of(conn).await {
            return Ok(IdentityRef::guest(participant_hash));
        }
        Ok(IdentityRef::guest(identity.identity))
    }

    /// Room policy, defaulting to the most restrictive settings on a
    /// missing row. The default is never written back.
    async fn policy_for(&self, map_hash: &str) -> Result<MapPermissionPolicy, SessionError> {
        Ok(store_call(self.policies.find(map_hash)).await?.unwrap_or_default())
    }

    /// Fan a frame out to every connection joined to a room, the
    /// originator included. A peer whose bounded queue is full loses its
    /// sender; its socket loop observes the closed channel and
    /// disconnects.
    async fn broadcast_to_room(&self, room: &str, message: ServerMessage) {
        for conn in self.rooms.connections_in(room).await {
            let Some(sender) = self.registry.sender_of(conn).await else {
                continue;
            };
            match sender.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(room, conn = %conn, "outbound queue overflow, dropping connection");
                    self.registry.drop_sender(conn).await;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

struct AuthorizedParticipant {
    participant_hash: String,
    permissions: waypoint_common::types::EffectivePermissions,
}

fn presence_key(identity: &str) -> String {
    format!("online.{identity}")
}

fn validate_coordinates(coordinates: Option<LatLng>) -> Result<(), SessionError> {
    match coordinates {
        Some(coordinates) if !coordinates.is_valid() => Err(SessionError::new(
            ErrorCode::ValidationFailed,
            "coordinates must be finite and inside WGS84 bounds",
        )),
        _ => Ok(()),
    }
}
