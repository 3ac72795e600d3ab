// External store bindings.
//
// Map, participant, permission, and action rows are owned by external
// services; the session core only issues the read/write calls below. Each
// store is either backed by the shared PostgreSQL pool or by an in-memory
// map for tests and local development, following the same split as the
// connection pool itself.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::warn;
use waypoint_common::types::{
    ActionKind, ActionStatus, LatLng, MapAction, MapPermissionPolicy, MapRecord, Participant,
    ParticipantStatus, ParticipantTier, SpecialPermissions,
};

use crate::db::pool::{check_pool_health, create_pg_pool, PoolConfig};

type ParticipantRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    i16,
    i16,
    serde_json::Value,
    i64,
    DateTime<Utc>,
);

type ActionRow = (
    String,
    String,
    i16,
    Option<f64>,
    Option<f64>,
    Option<serde_json::Value>,
    String,
    i16,
    i64,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

/// Map metadata reads.
#[derive(Clone)]
pub enum MapStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<String, MapRecord>>>),
}

impl MapStore {
    pub async fn find(&self, map_hash: &str) -> anyhow::Result<Option<MapRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (String, String, Option<String>, String, bool, DateTime<Utc>)>(
                    r#"
                    SELECT hash, name, description, creator_hash, public, created_at
                    FROM maps
                    WHERE hash = $1 AND deleted_at IS NULL
                    "#,
                )
                .bind(map_hash)
                .fetch_optional(pool)
                .await
                .context("failed to query map record")?;

                Ok(row.map(|(hash, name, description, creator_hash, public, created_at)| {
                    MapRecord { hash, name, description, creator_hash, public, created_at }
                }))
            }
            Self::Memory(store) => Ok(store.read().await.get(map_hash).cloned()),
        }
    }

    /// Seed a map row. Map rows are owned by the external map service;
    /// only the memory binding accepts writes.
    pub async fn seed(&self, map: MapRecord) -> anyhow::Result<()> {
        match self {
            Self::Postgres(_) => bail!("map rows are owned by the external map service"),
            Self::Memory(store) => {
                store.write().await.insert(map.hash.clone(), map);
                Ok(())
            }
        }
    }

    pub fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }
}

/// Room-level permission policy reads.
#[derive(Clone)]
pub enum PolicyStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<String, MapPermissionPolicy>>>),
}

impl PolicyStore {
    pub async fn find(&self, map_hash: &str) -> anyhow::Result<Option<MapPermissionPolicy>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (bool, i16)>(
                    r#"
                    SELECT anonymous_view, edit_rules
                    FROM map_permissions
                    WHERE map_hash = $1
                    "#,
                )
                .bind(map_hash)
                .fetch_optional(pool)
                .await
                .context("failed to query map permission policy")?;

                row.map(|(anonymous_view, edit_rules)| {
                    let edit_rules =
                        waypoint_common::types::EditRules::from_i16(edit_rules).ok_or_else(
                            || anyhow::anyhow!("invalid edit_rules value '{edit_rules}' in database"),
                        )?;
                    Ok(MapPermissionPolicy { anonymous_view, edit_rules })
                })
                .transpose()
            }
            Self::Memory(store) => Ok(store.read().await.get(map_hash).copied()),
        }
    }

    /// Seed a policy row; memory binding only, like [`MapStore::seed`].
    pub async fn seed(&self, map_hash: &str, policy: MapPermissionPolicy) -> anyhow::Result<()> {
        match self {
            Self::Postgres(_) => {
                bail!("permission rows are owned by the external permission service")
            }
            Self::Memory(store) => {
                store.write().await.insert(map_hash.to_string(), policy);
                Ok(())
            }
        }
    }

    pub fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }
}

/// Durable participant records, keyed by (map_hash, participant_hash) with
/// a secondary uniqueness constraint on (map_hash, user_hash).
#[derive(Clone)]
pub enum ParticipantStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<(String, String), Participant>>>),
}

impl ParticipantStore {
    pub async fn find_by_participant(
        &self,
        map_hash: &str,
        participant_hash: &str,
    ) -> anyhow::Result<Option<Participant>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, ParticipantRow>(
                    r#"
                    SELECT hash, map_hash, user_hash, participant_hash, name, avatar,
                           tier, status, special_permissions, version, created_at
                    FROM map_participants
                    WHERE map_hash = $1 AND participant_hash = $2
                    "#,
                )
                .bind(map_hash)
                .bind(participant_hash)
                .fetch_optional(pool)
                .await
                .context("failed to query participant by participant hash")?;

                row.map(participant_from_row).transpose()
            }
            Self::Memory(store) => Ok(store
                .read()
                .await
                .get(&(map_hash.to_string(), participant_hash.to_string()))
                .cloned()),
        }
    }

    pub async fn find_by_user(
        &self,
        map_hash: &str,
        user_hash: &str,
    ) -> anyhow::Result<Option<Participant>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, ParticipantRow>(
                    r#"
                    SELECT hash, map_hash, user_hash, participant_hash, name, avatar,
                           tier, status, special_permissions, version, created_at
                    FROM map_participants
                    WHERE map_hash = $1 AND user_hash = $2
                    "#,
                )
                .bind(map_hash)
                .bind(user_hash)
                .fetch_optional(pool)
                .await
                .context("failed to query participant by user hash")?;

                row.map(participant_from_row).transpose()
            }
            Self::Memory(store) => Ok(store
                .read()
                .await
                .values()
                .find(|participant| {
                    participant.map_hash == map_hash
                        && participant.user_hash.as_deref() == Some(user_hash)
                })
                .cloned()),
        }
    }

    pub async fn insert(&self, participant: &Participant) -> anyhow::Result<()> {
        match self {
            Self::Postgres(pool) => {
                let special = serde_json::to_value(participant.special_permissions)
                    .context("failed to encode special permissions")?;
                sqlx::query(
                    r#"
                    INSERT INTO map_participants
                        (hash, map_hash, user_hash, participant_hash, name, avatar,
                         tier, status, special_permissions, version, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(&participant.hash)
                .bind(&participant.map_hash)
                .bind(&participant.user_hash)
                .bind(&participant.participant_hash)
                .bind(&participant.name)
                .bind(&participant.avatar)
                .bind(participant.tier.as_i16())
                .bind(participant.status.as_i16())
                .bind(special)
                .bind(participant.version)
                .bind(participant.created_at)
                .execute(pool)
                .await
                .context("failed to insert participant record")?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let key = (participant.map_hash.clone(), participant.participant_hash.clone());
                if guard.contains_key(&key) {
                    bail!(
                        "participant '{}' already exists on map '{}'",
                        participant.participant_hash,
                        participant.map_hash
                    );
                }
                if let Some(user_hash) = participant.user_hash.as_deref() {
                    if guard.values().any(|existing| {
                        existing.map_hash == participant.map_hash
                            && existing.user_hash.as_deref() == Some(user_hash)
                    }) {
                        bail!(
                            "user '{user_hash}' already has a participant on map '{}'",
                            participant.map_hash
                        );
                    }
                }
                guard.insert(key, participant.clone());
                Ok(())
            }
        }
    }

    pub fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }
}

/// Action history, owned by the external action store. The core forwards
/// create/update/soft-delete calls and reads the live set.
#[derive(Clone)]
pub enum ActionStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<(String, String), MapAction>>>),
}

impl ActionStore {
    pub async fn insert(&self, action: &MapAction) -> anyhow::Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO map_actions
                        (hash, map_hash, kind, lat, lng, data, creator_hash,
                         status, version, created_at, deleted_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(&action.hash)
                .bind(&action.map_hash)
                .bind(action.kind.as_i16())
                .bind(action.lat)
                .bind(action.lng)
                .bind(&action.data)
                .bind(&action.creator_hash)
                .bind(action.status.as_i16())
                .bind(action.version)
                .bind(action.created_at)
                .bind(action.deleted_at)
                .execute(pool)
                .await
                .context("failed to insert action record")?;
                Ok(())
            }
            Self::Memory(store) => {
                store
                    .write()
                    .await
                    .insert((action.map_hash.clone(), action.hash.clone()), action.clone());
                Ok(())
            }
        }
    }

    /// Field-level last-write-wins update. Returns the updated row, or
    /// `None` when the action does not exist on that map.
    pub async fn update(
        &self,
        map_hash: &str,
        hash: &str,
        coordinates: Option<LatLng>,
        data: Option<serde_json::Value>,
    ) -> anyhow::Result<Option<MapAction>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, ActionRow>(
                    r#"
                    UPDATE map_actions
                    SET lat = COALESCE($3, lat),
                        lng = COALESCE($4, lng),
                        data = COALESCE($5, data),
                        version = version + 1
                    WHERE map_hash = $1 AND hash = $2
                    RETURNING hash, map_hash, kind, lat, lng, data, creator_hash,
                              status, version, created_at, deleted_at
                    "#,
                )
                .bind(map_hash)
                .bind(hash)
                .bind(coordinates.map(|c| c.lat))
                .bind(coordinates.map(|c| c.lng))
                .bind(data)
                .fetch_optional(pool)
                .await
                .context("failed to update action record")?;

                row.map(action_from_row).transpose()
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let Some(action) = guard.get_mut(&(map_hash.to_string(), hash.to_string()))
                else {
                    return Ok(None);
                };
                if let Some(coordinates) = coordinates {
                    action.lat = Some(coordinates.lat);
                    action.lng = Some(coordinates.lng);
                }
                if let Some(data) = data {
                    action.data = Some(data);
                }
                action.version += 1;
                Ok(Some(action.clone()))
            }
        }
    }

    /// Soft delete: flip status and stamp `deleted_at`; the row remains.
    pub async fn soft_delete(
        &self,
        map_hash: &str,
        hash: &str,
    ) -> anyhow::Result<Option<MapAction>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, ActionRow>(
                    r#"
                    UPDATE map_actions
                    SET status = -1,
                        deleted_at = NOW(),
                        version = version + 1
                    WHERE map_hash = $1 AND hash = $2
                    RETURNING hash, map_hash, kind, lat, lng, data, creator_hash,
                              status, version, created_at, deleted_at
                    "#,
                )
                .bind(map_hash)
                .bind(hash)
                .fetch_optional(pool)
                .await
                .context("failed to soft-delete action record")?;

                row.map(action_from_row).transpose()
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let Some(action) = guard.get_mut(&(map_hash.to_string(), hash.to_string()))
                else {
                    return Ok(None);
                };
                action.status = ActionStatus::Deleted;
                action.deleted_at = Some(Utc::now());
                action.version += 1;
                Ok(Some(action.clone()))
            }
        }
    }

    /// All non-deleted actions on a map, oldest first.
    pub async fn live_actions(&self, map_hash: &str) -> anyhow::Result<Vec<MapAction>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, ActionRow>(
                    r#"
                    SELECT hash, map_hash, kind, lat, lng, data, creator_hash,
                           status, version, created_at, deleted_at
                    FROM map_actions
                    WHERE map_hash = $1 AND status >= 0
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(map_hash)
                .fetch_all(pool)
                .await
                .context("failed to query live actions")?;

                rows.into_iter().map(action_from_row).collect()
            }
            Self::Memory(store) => {
                let mut actions: Vec<MapAction> = store
                    .read()
                    .await
                    .values()
                    .filter(|action| {
                        action.map_hash == map_hash && action.status == ActionStatus::Live
                    })
                    .cloned()
                    .collect();
                actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                Ok(actions)
            }
        }
    }

    pub fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }
}

fn participant_from_row(row: ParticipantRow) -> anyhow::Result<Participant> {
    let (
        hash,
        map_hash,
        user_hash,
        participant_hash,
        name,
        avatar,
        tier,
        status,
        special_permissions,
        version,
        created_at,
    ) = row;

    let tier = ParticipantTier::from_i16(tier)
        .ok_or_else(|| anyhow::anyhow!("invalid participant tier '{tier}' in database"))?;
    let status = ParticipantStatus::from_i16(status)
        .ok_or_else(|| anyhow::anyhow!("invalid participant status '{status}' in database"))?;
    let special_permissions: SpecialPermissions = serde_json::from_value(special_permissions)
        .context("invalid special_permissions payload in database")?;

    Ok(Participant {
        hash,
        map_hash,
        user_hash,
        participant_hash,
        name,
        avatar,
        tier,
        status,
        special_permissions,
        version,
        created_at,
    })
}

fn action_from_row(row: ActionRow) -> anyhow::Result<MapAction> {
    let (hash, map_hash, kind, lat, lng, data, creator_hash, status, version, created_at, deleted_at) =
        row;

    let kind = ActionKind::from_i16(kind)
        .ok_or_else(|| anyhow::anyhow!("invalid action kind '{kind}' in database"))?;
    let status = ActionStatus::from_i16(status)
        .ok_or_else(|| anyhow::anyhow!("invalid action status '{status}' in database"))?;

    Ok(MapAction {
        hash,
        map_hash,
        kind,
        lat,
        lng,
        data,
        creator_hash,
        status,
        version,
        created_at,
        deleted_at,
    })
}

/// The full set of external stores the session core talks to.
#[derive(Clone)]
pub struct Stores {
    pub maps: MapStore,
    pub policies: PolicyStore,
    pub participants: ParticipantStore,
    pub actions: ActionStore,
}

impl Stores {
    /// Bind all stores to one PostgreSQL pool, or fall back to in-memory
    /// maps when no database URL is configured.
    pub async fn from_env(database_url: Option<&str>) -> anyhow::Result<Self> {
        match database_url {
            Some(database_url) => {
                let pool = create_pg_pool(database_url, PoolConfig::from_env())
                    .await
                    .context("failed to initialize PostgreSQL pool for session stores")?;
                check_pool_health(&pool)
                    .await
                    .context("PostgreSQL health check failed for session stores")?;

                Ok(Self {
                    maps: MapStore::Postgres(pool.clone()),
                    policies: PolicyStore::Postgres(pool.clone()),
                    participants: ParticipantStore::Postgres(pool.clone()),
                    actions: ActionStore::Postgres(pool),
                })
            }
            None => {
                warn!("WAYPOINT_DATABASE_URL is unset, running with in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            maps: MapStore::for_tests(),
            policies: PolicyStore::for_tests(),
            participants: ParticipantStore::for_tests(),
            actions: ActionStore::for_tests(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use waypoint_common::types::{
        ActionKind, ActionStatus, LatLng, MapAction, MapPermissionPolicy, MapRecord, Participant,
        ParticipantStatus, ParticipantTier, SpecialPermissions,
    };

    use super::{ActionStore, MapStore, ParticipantStore, PolicyStore};

    fn participant(map_hash: &str, participant_hash: &str, user_hash: Option<&str>) -> Participant {
        Participant {
            hash: format!("rec-{participant_hash}"),
            map_hash: map_hash.to_string(),
            user_hash: user_hash.map(ToOwned::to_owned),
            participant_hash: participant_hash.to_string(),
            name: None,
            avatar: None,
            tier: ParticipantTier::Viewer,
            status: ParticipantStatus::Active,
            special_permissions: SpecialPermissions::default(),
            version: 1,
            created_at: Utc::now(),
        }
    }

    fn action(map_hash: &str, hash: &str) -> MapAction {
        MapAction {
            hash: hash.to_string(),
            map_hash: map_hash.to_string(),
            kind: ActionKind::Marker,
            lat: Some(1.0),
            lng: Some(2.0),
            data: None,
            creator_hash: "p1".to_string(),
            status: ActionStatus::Live,
            version: 1,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn participant_uniqueness_is_enforced_per_map() {
        let store = ParticipantStore::for_tests();

        store.insert(&participant("m1", "p1", Some("u1"))).await.expect("first insert");
        assert!(store.insert(&participant("m1", "p1", None)).await.is_err());
        assert!(store.insert(&participant("m1", "p2", Some("u1"))).await.is_err());
        // Same identities on another map are fine.
        store.insert(&participant("m2", "p1", Some("u1"))).await.expect("other-map insert");

        let found = store
            .find_by_user("m1", "u1")
            .await
            .expect("lookup should succeed")
            .expect("participant should exist");
        assert_eq!(found.participant_hash, "p1");
    }

    #[tokio::test]
    async fn soft_deleted_actions_leave_the_live_set() {
        let store = ActionStore::for_tests();
        store.insert(&action("m1", "a1")).await.expect("insert");
        store.insert(&action("m1", "a2")).await.expect("insert");

        let dropped = store
            .soft_delete("m1", "a1")
            .await
            .expect("soft delete should succeed")
            .expect("action should exist");
        assert_eq!(dropped.status, ActionStatus::Deleted);
        assert!(dropped.deleted_at.is_some());
        assert_eq!(dropped.version, 2);

        let live = store.live_actions("m1").await.expect("live query");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].hash, "a2");

        assert!(store.soft_delete("m1", "missing").await.expect("query").is_none());
    }

    #[tokio::test]
    async fn update_is_field_level_last_write_wins() {
        let store = ActionStore::for_tests();
        store.insert(&action("m1", "a1")).await.expect("insert");

        let updated = store
            .update("m1", "a1", Some(LatLng { lat: 5.0, lng: 6.0 }), None)
            .await
            .expect("update should succeed")
            .expect("action should exist");
        assert_eq!(updated.lat, Some(5.0));
        assert_eq!(updated.data, None);

        let updated = store
            .update("m1", "a1", None, Some(serde_json::json!({"name": "camp"})))
            .await
            .expect("update should succeed")
            .expect("action should exist");
        // Earlier coordinates survive a data-only write.
        assert_eq!(updated.lng, Some(6.0));
        assert_eq!(updated.data.expect("data should be set")["name"], "camp");
        assert_eq!(updated.version, 3);
    }

    #[tokio::test]
    async fn map_and_policy_seeding_round_trip() {
        let maps = MapStore::for_tests();
        let policies = PolicyStore::for_tests();

        maps.seed(MapRecord {
            hash: "m1".to_string(),
            name: "Trip".to_string(),
            description: None,
            creator_hash: "u1".to_string(),
            public: true,
            created_at: Utc::now(),
        })
        .await
        .expect("seed map");
        policies
            .seed("m1", MapPermissionPolicy { anonymous_view: true, ..Default::default() })
            .await
            .expect("seed policy");

        let map = maps.find("m1").await.expect("query").expect("map should exist");
        assert_eq!(map.creator_hash, "u1");
        let policy = policies.find("m1").await.expect("query").expect("policy should exist");
        assert!(policy.anonymous_view);
        assert!(maps.find("missing").await.expect("query").is_none());
    }
}
