// Connection registry: identity <-> live connection bookkeeping.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use waypoint_common::protocol::ws::ServerMessage;

/// Ephemeral id of one WebSocket connection. Never persisted.
pub type ConnId = Uuid;

/// Identity attached to a connection at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    /// User hash for authenticated callers, anonymous id for guests.
    pub identity: String,
    pub logged_in: bool,
}

/// Externally visible online/offline transition caused by a register or
/// unregister call. Computed from set size before/after the mutation so it
/// stays consistent when one identity multiplexes several connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    CameOnline,
    WentOffline,
    Unchanged,
}

#[derive(Debug, Default)]
struct RegistryInner {
    identity_conns: HashMap<String, HashSet<ConnId>>,
    conn_identity: HashMap<ConnId, ConnectionIdentity>,
    conn_senders: HashMap<ConnId, mpsc::Sender<ServerMessage>>,
}

/// Maps identities to their live connections and each connection back to
/// its identity plus outbound sender. Owns its maps exclusively; all
/// access goes through these methods.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Register a connection under an identity. Idempotent for duplicate
    /// calls with the same connection id.
    pub async fn register(
        &self,
        identity: &str,
        logged_in: bool,
        conn: ConnId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> PresenceTransition {
        let mut guard = self.inner.write().await;

        if guard.conn_identity.contains_key(&conn) {
            return PresenceTransition::Unchanged;
        }

        let conns = guard.identity_conns.entry(identity.to_string()).or_default();
        let was_offline = conns.is_empty();
        conns.insert(conn);

        guard
            .conn_identity
            .insert(conn, ConnectionIdentity { identity: identity.to_string(), logged_in });
        guard.conn_senders.insert(conn, sender);

        if was_offline {
            PresenceTransition::CameOnline
        } else {
            PresenceTransition::Unchanged
        }
    }

    /// Remove a connection. No-op (returns `None`) for unknown ids.
    pub async fn unregister(
        &self,
        conn: ConnId,
    ) -> Option<(ConnectionIdentity, PresenceTransition)> {
        let mut guard = self.inner.write().await;

        let identity = guard.conn_identity.remove(&conn)?;
        guard.conn_senders.remove(&conn);

        let transition = match guard.identity_conns.get_mut(&identity.identity) {
            Some(conns) => {
                conns.remove(&conn);
                if conns.is_empty() {
                    guard.identity_conns.remove(&identity.identity);
                    PresenceTransition::WentOffline
                } else {
                    PresenceTransition::Unchanged
                }
            }
            None => PresenceTransition::Unchanged,
        };

        Some((identity, transition))
    }

    /// Live connections of an identity; empty when unknown, never an error.
    pub async fn connections_of(&self, identity: &str) -> Vec<ConnId> {
        self.inner
            .read()
            .await
            .identity_conns
            .get(identity)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn identity_of(&self, conn: ConnId) -> Option<ConnectionIdentity> {
        self.inner.read().await.conn_identity.get(&conn).cloned()
    }

    pub async fn sender_of(&self, conn: ConnId) -> Option<mpsc::Sender<ServerMessage>> {
        self.inner.read().await.conn_senders.get(&conn).cloned()
    }

    /// Drop a connection's outbound sender without unregistering it. The
    /// socket loop observes the closed channel and disconnects; used when
    /// a slow peer overflows its bounded queue.
    pub async fn drop_sender(&self, conn: ConnId) {
        self.inner.write().await.conn_senders.remove(&conn);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;
    use waypoint_common::protocol::ws::ServerMessage;

    use super::{ConnectionRegistry, PresenceTransition};

    fn sender() -> mpsc::Sender<ServerMessage> {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn presence_flips_on_first_and_last_connection_only() {
        let registry = ConnectionRegistry::default();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(
            registry.register("user-1", true, c1, sender()).await,
            PresenceTransition::CameOnline
        );
        assert_eq!(
            registry.register("user-1", true, c2, sender()).await,
            PresenceTransition::Unchanged
        );

        let (_, transition) = registry.unregister(c1).await.expect("c1 should be registered");
        assert_eq!(transition, PresenceTransition::Unchanged);

        let (identity, transition) =
            registry.unregister(c2).await.expect("c2 should be registered");
        assert_eq!(identity.identity, "user-1");
        assert_eq!(transition, PresenceTransition::WentOffline);

        assert!(registry.connections_of("user-1").await.is_empty());
    }

    #[tokio::test]
    async fn register_is_idempotent_per_connection() {
        let registry = ConnectionRegistry::default();
        let conn = Uuid::new_v4();

        registry.register("anon-7", false, conn, sender()).await;
        assert_eq!(
            registry.register("anon-7", false, conn, sender()).await,
            PresenceTransition::Unchanged
        );

        assert_eq!(registry.connections_of("anon-7").await.len(), 1);
        let identity = registry.identity_of(conn).await.expect("conn should be known");
        assert_eq!(identity.identity, "anon-7");
        assert!(!identity.logged_in);
    }

    #[tokio::test]
    async fn unregister_unknown_connection_is_a_noop() {
        let registry = ConnectionRegistry::default();
        assert!(registry.unregister(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn dropped_sender_closes_the_channel() {
        let registry = ConnectionRegistry::default();
        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(1);

        registry.register("anon-7", false, conn, tx).await;
        registry.drop_sender(conn).await;

        assert!(registry.sender_of(conn).await.is_none());
        assert!(rx.recv().await.is_none());
        // Identity bookkeeping survives until unregister.
        assert!(registry.identity_of(conn).await.is_some());
    }
}
