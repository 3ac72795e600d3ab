//! Participant resolution.
//!
//! Maps a caller identity to its durable per-map participant record,
//! creating the record lazily on first contact. Every store call is
//! timeout-wrapped; callers on authorization paths convert the resulting
//! store errors to denials via [`SessionError::fail_closed`].

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;
use waypoint_common::types::{
    Participant, ParticipantStatus, ParticipantTier, SpecialPermissions,
};

use crate::cache::TtlCache;
use crate::error::{ErrorCode, SessionError};
use crate::store::{MapStore, ParticipantStore};

/// Upper bound on any single external store call.
pub const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved participant records stay cached for an hour.
const PARTICIPANT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
/// The user-hash to participant-hash index changes rarely; cache for a day.
const USER_INDEX_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Caller identity as presented to the resolver: exactly one of the two
/// hashes must be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRef {
    pub user_hash: Option<String>,
    pub participant_hash: Option<String>,
}

impl IdentityRef {
    pub fn user(user_hash: impl Into<String>) -> Self {
        Self { user_hash: Some(user_hash.into()), participant_hash: None }
    }

    pub fn guest(participant_hash: impl Into<String>) -> Self {
        Self { user_hash: None, participant_hash: Some(participant_hash.into()) }
    }
}

/// Resolves caller identities to participant records, caching by both
/// (map, participant) and (map, user).
pub struct ParticipantResolver {
    maps: MapStore,
    participants: ParticipantStore,
    participant_cache: TtlCache<(String, String), Participant>,
    user_index_cache: TtlCache<(String, String), String>,
}

impl ParticipantResolver {
    pub fn new(maps: MapStore, participants: ParticipantStore) -> Self {
        Self {
            maps,
            participants,
            participant_cache: TtlCache::new(),
            user_index_cache: TtlCache::new(),
        }
    }

    /// Resolve an identity to its participant on a map, creating the
    /// record on first contact. Returns the participant and whether it
    /// was created by this call.
    pub async fn resolve(
        &self,
        map_hash: &str,
        identity: &IdentityRef,
    ) -> Result<(Participant, bool), SessionError> {
        match (identity.user_hash.as_deref(), identity.participant_hash.as_deref()) {
            (Some(user_hash), None) => self.resolve_by_user(map_hash, user_hash).await,
            (None, Some(participant_hash)) => {
                self.resolve_guest(map_hash, participant_hash).await
            }
            _ => Err(SessionError::from_code(ErrorCode::InvalidIdentity)),
        }
    }

    /// Resolve the participant of an authenticated user.
    pub async fn resolve_by_user(
        &self,
        map_hash: &str,
        user_hash: &str,
    ) -> Result<(Participant, bool), SessionError> {
        let index_key = (map_hash.to_string(), user_hash.to_string());
        if let Some(participant_hash) = self.user_index_cache.get(&index_key).await {
            let cache_key = (map_hash.to_string(), participant_hash);
            if let Some(participant) = self.participant_cache.get(&cache_key).await {
                return Ok((participant, false));
            }
        }

        if let Some(participant) =
            store_call(self.participants.find_by_user(map_hash, user_hash)).await?
        {
            self.remember(&participant).await;
            return Ok((participant, false));
        }

        let map = store_call(self.maps.find(map_hash))
            .await?
            .ok_or_else(|| SessionError::from_code(ErrorCode::NotFound))?;

        let tier = if map.creator_hash == user_hash {
            ParticipantTier::Creator
        } else {
            ParticipantTier::Viewer
        };
        let participant = new_participant(
            map_hash,
            Some(user_hash.to_string()),
            Uuid::new_v4().simple().to_string(),
            None,
            tier,
        );
        self.create(participant).await
    }

    /// Resolve a guest by its client-durable participant hash.
    async fn resolve_guest(
        &self,
        map_hash: &str,
        participant_hash: &str,
    ) -> Result<(Participant, bool), SessionError> {
        let cache_key = (map_hash.to_string(), participant_hash.to_string());
        let participant = match self.participant_cache.get(&cache_key).await {
            Some(participant) => Some(participant),
            None => {
                store_call(self.participants.find_by_participant(map_hash, participant_hash))
                    .await?
            }
        };

        if let Some(participant) = participant {
            // A guest cannot claim a participant record that belongs to
            // an authenticated user.
            if participant.user_hash.is_some() {
                warn!(map_hash, participant_hash, "guest presented a user-owned participant hash");
                return Err(SessionError::from_code(ErrorCode::AccessDenied));
            }
            self.remember(&participant).await;
            return Ok((participant, false));
        }

        if store_call(self.maps.find(map_hash)).await?.is_none() {
            return Err(SessionError::from_code(ErrorCode::NotFound));
        }

        let name = guest_name(participant_hash);
        let participant = new_participant(
            map_hash,
            None,
            participant_hash.to_string(),
            Some(name),
            ParticipantTier::Viewer,
        );
        self.create(participant).await
    }

    /// Batch lookup for join snapshots. Unknown hashes are skipped.
    pub async fn participants_for(
        &self,
        map_hash: &str,
        participant_hashes: &[String],
    ) -> Result<Vec<Participant>, SessionError> {
        let mut out = Vec::with_capacity(participant_hashes.len());
        for participant_hash in participant_hashes {
            let cache_key = (map_hash.to_string(), participant_hash.clone());
            if let Some(participant) = self.participant_cache.get(&cache_key).await {
                out.push(participant);
                continue;
            }
            if let Some(participant) =
                store_call(self.participants.find_by_participant(map_hash, participant_hash))
                    .await?
            {
                self.remember(&participant).await;
                out.push(participant);
            }
        }
        Ok(out)
    }

    async fn create(&self, participant: Participant) -> Result<(Participant, bool), SessionError> {
        match store_call(self.participants.insert(&participant)).await {
            Ok(()) => {
                debug!(
                    map_hash = %participant.map_hash,
                    participant_hash = %participant.participant_hash,
                    "created participant record"
                );
                self.remember(&participant).await;
                Ok((participant, true))
            }
            Err(insert_error) => {
                // A concurrent resolve may have created the record first;
                // re-read before surfacing the insert failure.
                let existing = store_call(
                    self.participants
                        .find_by_participant(&participant.map_hash, &participant.participant_hash),
                )
                .await
                .ok()
                .flatten();
                match existing {
                    Some(existing) => {
                        self.remember(&existing).await;
                        Ok((existing, false))
                    }
                    None => Err(insert_error),
                }
            }
        }
    }

    async fn remember(&self, participant: &Participant) {
        self.participant_cache
            .set(
                (participant.map_hash.clone(), participant.participant_hash.clone()),
                participant.clone(),
                PARTICIPANT_CACHE_TTL,
            )
            .await;
        if let Some(user_hash) = &participant.user_hash {
            self.user_index_cache
                .set(
                    (participant.map_hash.clone(), user_hash.clone()),
                    participant.participant_hash.clone(),
                    USER_INDEX_CACHE_TTL,
                )
                .await;
        }
    }
}

/// Wrap a store future with the call timeout, mapping both failure shapes
/// onto caller-visible error codes.
pub async fn store_call<T>(
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, SessionError> {
    match tokio::time::timeout(STORE_CALL_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => {
            warn!(error = %error, "external store call failed");
            Err(SessionError::from_code(ErrorCode::StoreUnavailable))
        }
        Err(_) => {
            warn!("external store call timed out");
            Err(SessionError::from_code(ErrorCode::StoreTimeout))
        }
    }
}

fn new_participant(
    map_hash: &str,
    user_hash: Option<String>,
    participant_hash: String,
    name: Option<String>,
    tier: ParticipantTier,
) -> Participant {
    Participant {
        hash: Uuid::new_v4().simple().to_string(),
        map_hash: map_hash.to_string(),
        user_hash,
        participant_hash,
        name,
        avatar: None,
        tier,
        status: ParticipantStatus::Active,
        special_permissions: SpecialPermissions::default(),
        version: 1,
        created_at: chrono::Utc::now(),
    }
}

fn guest_name(participant_hash: &str) -> String {
    let prefix: String = participant_hash.chars().take(8).collect();
    format!("guest-{prefix}")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use waypoint_common::types::{MapRecord, ParticipantTier};

    use super::{IdentityRef, ParticipantResolver};
    use crate::error::ErrorCode;
    use crate::store::{MapStore, ParticipantStore};

    async fn resolver_with_map(creator_hash: &str) -> ParticipantResolver {
        let maps = MapStore::for_tests();
        maps.seed(MapRecord {
            hash: "m1".to_string(),
            name: "Trip".to_string(),
            description: None,
            creator_hash: creator_hash.to_string(),
            public: true,
            created_at: Utc::now(),
        })
        .await
        .expect("seed map");
        ParticipantResolver::new(maps, ParticipantStore::for_tests())
    }

    #[tokio::test]
    async fn identity_must_carry_exactly_one_hash() {
        let resolver = resolver_with_map("u1").await;

        let both = IdentityRef {
            user_hash: Some("u1".to_string()),
            participant_hash: Some("p1".to_string()),
        };
        let error = resolver.resolve("m1", &both).await.expect_err("both hashes should fail");
        assert_eq!(error.code, ErrorCode::InvalidIdentity);

        let neither = IdentityRef { user_hash: None, participant_hash: None };
        let error = resolver.resolve("m1", &neither).await.expect_err("no hash should fail");
        assert_eq!(error.code, ErrorCode::InvalidIdentity);
    }

    #[tokio::test]
    async fn first_contact_creates_the_record_once() {
        let resolver = resolver_with_map("creator").await;

        let (participant, created) = resolver
            .resolve("m1", &IdentityRef::user("u1"))
            .await
            .expect("resolve should succeed");
        assert!(created);
        assert_eq!(participant.tier, ParticipantTier::Viewer);
        assert_eq!(participant.user_hash.as_deref(), Some("u1"));

        let (again, created) = resolver
            .resolve("m1", &IdentityRef::user("u1"))
            .await
            .expect("resolve should succeed");
        assert!(!created);
        assert_eq!(again.participant_hash, participant.participant_hash);
    }

    #[tokio::test]
    async fn map_creator_gets_the_creator_tier() {
        let resolver = resolver_with_map("u1").await;
        let (participant, _) = resolver
            .resolve("m1", &IdentityRef::user("u1"))
            .await
            .expect("resolve should succeed");
        assert_eq!(participant.tier, ParticipantTier::Creator);
    }

    #[tokio::test]
    async fn guests_get_a_readable_name_and_viewer_tier() {
        let resolver = resolver_with_map("u1").await;
        let (participant, created) = resolver
            .resolve("m1", &IdentityRef::guest("anon-abcdef0123456789"))
            .await
            .expect("resolve should succeed");
        assert!(created);
        assert_eq!(participant.tier, ParticipantTier::Viewer);
        assert_eq!(participant.name.as_deref(), Some("guest-anon-abc"));
        assert_eq!(participant.user_hash, None);
    }

    #[tokio::test]
    async fn guest_cannot_claim_a_user_owned_record() {
        let resolver = resolver_with_map("u1").await;
        let (owned, _) = resolver
            .resolve("m1", &IdentityRef::user("u1"))
            .await
            .expect("resolve should succeed");

        let error = resolver
            .resolve("m1", &IdentityRef::guest(owned.participant_hash))
            .await
            .expect_err("claiming a user-owned hash should fail");
        assert_eq!(error.code, ErrorCode::AccessDenied);
    }

    #[tokio::test]
    async fn unknown_map_is_not_found() {
        let resolver = resolver_with_map("u1").await;
        let error = resolver
            .resolve("missing", &IdentityRef::user("u1"))
            .await
            .expect_err("unknown map should fail");
        assert_eq!(error.code, ErrorCode::NotFound);
    }
}
