// Room membership: which participants and connections are in which map room.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::registry::ConnId;

#[derive(Debug, Default)]
struct MembershipInner {
    conn_participant: HashMap<ConnId, String>,
    conn_rooms: HashMap<ConnId, HashSet<String>>,
    participant_conns: HashMap<String, HashSet<ConnId>>,
    room_participants: HashMap<String, HashSet<String>>,
    room_conns: HashMap<String, HashSet<ConnId>>,
}

impl MembershipInner {
    /// True when any live connection of the participant is still joined to
    /// the room. Runs under the same write guard as the eviction decision
    /// so a concurrent join cannot interleave.
    fn participant_still_in_room(&self, participant_hash: &str, room: &str) -> bool {
        self.participant_conns
            .get(participant_hash)
            .map(|conns| {
                conns.iter().any(|conn| {
                    self.conn_rooms.get(conn).is_some_and(|rooms| rooms.contains(room))
                })
            })
            .unwrap_or(false)
    }

    /// Remove the participant from the room's participant set unless one of
    /// its other connections keeps it present. Returns true on eviction.
    fn evict_if_absent(&mut self, participant_hash: &str, room: &str) -> bool {
        if self.participant_still_in_room(participant_hash, room) {
            return false;
        }

        let evicted = self
            .room_participants
            .get_mut(room)
            .map(|participants| participants.remove(participant_hash))
            .unwrap_or(false);
        if self.room_participants.get(room).is_some_and(HashSet::is_empty) {
            self.room_participants.remove(room);
        }

        evicted
    }

    fn detach_conn_if_roomless(&mut self, conn: ConnId) {
        if self.conn_rooms.get(&conn).is_none_or(HashSet::is_empty) {
            self.conn_rooms.remove(&conn);
            if let Some(participant_hash) = self.conn_participant.remove(&conn) {
                if let Some(conns) = self.participant_conns.get_mut(&participant_hash) {
                    conns.remove(&conn);
                    if conns.is_empty() {
                        self.participant_conns.remove(&participant_hash);
                    }
                }
            }
        }
    }
}

/// Tracks room membership across multiplexed connections.
///
/// One participant may hold several simultaneous connections (multi-tab,
/// multi-device); a participant leaves a room's participant set only when
/// its *last* connection joined to that room goes away. All four indexes
/// are mutated under one write lock, with no await point in between.
#[derive(Debug, Default)]
pub struct RoomMembership {
    inner: RwLock<MembershipInner>,
}

impl RoomMembership {
    /// Record `conn` as joined to `room` on behalf of `participant_hash`.
    /// Set semantics make duplicate joins no-ops. Returns true when the
    /// participant newly entered the room's participant set, so callers
    /// can announce the join exactly once.
    pub async fn join(&self, participant_hash: &str, room: &str, conn: ConnId) -> bool {
        let mut guard = self.inner.write().await;

        guard.conn_rooms.entry(conn).or_default().insert(room.to_string());
        guard.conn_participant.insert(conn, participant_hash.to_string());
        guard.participant_conns.entry(participant_hash.to_string()).or_default().insert(conn);
        guard.room_conns.entry(room.to_string()).or_default().insert(conn);
        guard
            .room_participants
            .entry(room.to_string())
            .or_default()
            .insert(participant_hash.to_string())
    }

    /// Inverse of [`join`](Self::join) for one specific connection.
    /// Returns true when the participant was evicted from the room (no
    /// other connection of theirs remains joined to it).
    pub async fn leave(&self, participant_hash: &str, room: &str, conn: ConnId) -> bool {
        let mut guard = self.inner.write().await;

        if let Some(rooms) = guard.conn_rooms.get_mut(&conn) {
            rooms.remove(room);
        }
        if let Some(conns) = guard.room_conns.get_mut(room) {
            conns.remove(&conn);
            if conns.is_empty() {
                guard.room_conns.remove(room);
            }
        }

        let evicted = guard.evict_if_absent(participant_hash, room);
        guard.detach_conn_if_roomless(conn);

        evicted
    }

    /// Leave every room the connection had joined and purge it from all
    /// indexes. Safe to call for a connection with no memberships. Returns
    /// the (room, participant) pairs that lost their last presence, in no
    /// particular order.
    pub async fn disconnect(&self, conn: ConnId) -> Vec<(String, String)> {
        let mut guard = self.inner.write().await;

        let Some(participant_hash) = guard.conn_participant.remove(&conn) else {
            return Vec::new();
        };
        let rooms = guard.conn_rooms.remove(&conn).unwrap_or_default();

        if let Some(conns) = guard.participant_conns.get_mut(&participant_hash) {
            conns.remove(&conn);
            if conns.is_empty() {
                guard.participant_conns.remove(&participant_hash);
            }
        }

        let mut evicted = Vec::new();
        for room in rooms {
            if let Some(conns) = guard.room_conns.get_mut(&room) {
                conns.remove(&conn);
                if conns.is_empty() {
                    guard.room_conns.remove(&room);
                }
            }

            if guard.evict_if_absent(&participant_hash, &room) {
                evicted.push((room, participant_hash.clone()));
            }
        }

        evicted
    }

    /// Participant hashes present in a room. Set semantics; order is
    /// irrelevant.
    pub async fn participants_of(&self, room: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .room_participants
            .get(room)
            .map(|participants| participants.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn rooms_of(&self, conn: ConnId) -> Vec<String> {
        self.inner
            .read()
            .await
            .conn_rooms
            .get(&conn)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Connections currently joined to a room, for broadcast fan-out.
    pub async fn connections_in(&self, room: &str) -> Vec<ConnId> {
        self.inner
            .read()
            .await
            .room_conns
            .get(room)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The participant a connection last joined as.
    pub async fn participant_of(&self, conn: ConnId) -> Option<String> {
        self.inner.read().await.conn_participant.get(&conn).cloned()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::RoomMembership;

    #[tokio::test]
    async fn second_connection_keeps_participant_in_room() {
        let rooms = RoomMembership::default();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(rooms.join("p1", "m1", c1).await);
        assert!(!rooms.join("p1", "m1", c2).await, "second connection is not a new entry");

        let evicted = rooms.disconnect(c1).await;
        assert!(evicted.is_empty(), "participant should remain while c2 is joined");
        assert_eq!(rooms.participants_of("m1").await, vec!["p1".to_string()]);

        let evicted = rooms.disconnect(c2).await;
        assert_eq!(evicted, vec![("m1".to_string(), "p1".to_string())]);
        assert!(rooms.participants_of("m1").await.is_empty());
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let rooms = RoomMembership::default();
        let conn = Uuid::new_v4();

        rooms.join("p1", "m1", conn).await;
        rooms.join("p1", "m1", conn).await;

        assert_eq!(rooms.participants_of("m1").await.len(), 1);
        assert_eq!(rooms.connections_in("m1").await.len(), 1);
        assert_eq!(rooms.rooms_of(conn).await.len(), 1);
    }

    #[tokio::test]
    async fn leave_respects_other_connections_of_the_participant() {
        let rooms = RoomMembership::default();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());

        rooms.join("p1", "m1", c1).await;
        rooms.join("p1", "m1", c2).await;

        assert!(!rooms.leave("p1", "m1", c1).await);
        assert_eq!(rooms.participants_of("m1").await, vec!["p1".to_string()]);

        assert!(rooms.leave("p1", "m1", c2).await);
        assert!(rooms.participants_of("m1").await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_handles_multiple_rooms_per_connection() {
        let rooms = RoomMembership::default();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());

        rooms.join("p1", "m1", c1).await;
        rooms.join("p1", "m2", c1).await;
        // c2 keeps p1 present in m1 only.
        rooms.join("p1", "m1", c2).await;

        let mut evicted = rooms.disconnect(c1).await;
        evicted.sort();
        assert_eq!(evicted, vec![("m2".to_string(), "p1".to_string())]);
        assert_eq!(rooms.participants_of("m1").await, vec!["p1".to_string()]);
        assert!(rooms.participants_of("m2").await.is_empty());
    }

    #[tokio::test]
    async fn leave_in_one_room_keeps_conn_attached_elsewhere() {
        let rooms = RoomMembership::default();
        let conn = Uuid::new_v4();

        rooms.join("p1", "m1", conn).await;
        rooms.join("p1", "m2", conn).await;

        assert!(rooms.leave("p1", "m1", conn).await);
        assert_eq!(rooms.participant_of(conn).await.as_deref(), Some("p1"));
        assert_eq!(rooms.rooms_of(conn).await, vec!["m2".to_string()]);

        assert!(rooms.leave("p1", "m2", conn).await);
        assert_eq!(rooms.participant_of(conn).await, None);
    }

    #[tokio::test]
    async fn disconnect_without_memberships_is_a_noop() {
        let rooms = RoomMembership::default();
        assert!(rooms.disconnect(Uuid::new_v4()).await.is_empty());
    }
}
