// Core domain types shared across all Waypoint crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permission tier of a map participant.
///
/// The ordering is the contract: each tier grants a superset of the
/// permissions of every lower tier. Numeric values are an internal
/// storage detail, not part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantTier {
    Viewer,
    Editor,
    Moderator,
    Admin,
    Creator,
}

impl ParticipantTier {
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::Viewer => 0,
            Self::Editor => 1,
            Self::Moderator => 2,
            Self::Admin => 3,
            Self::Creator => 4,
        }
    }

    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Viewer),
            1 => Some(Self::Editor),
            2 => Some(Self::Moderator),
            3 => Some(Self::Admin),
            4 => Some(Self::Creator),
            _ => None,
        }
    }
}

/// Lifecycle status of a participant. Banned participants keep their
/// record (soft ban) but lose every effective permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Banned,
}

impl ParticipantStatus {
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::Active => 0,
            Self::Banned => -1,
        }
    }

    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Active),
            -1 => Some(Self::Banned),
            _ => None,
        }
    }
}

/// The durable per-(map, identity) record.
///
/// At most one non-deleted participant exists per (map_hash, user_hash)
/// and per (map_hash, participant_hash); the store enforces this as a
/// uniqueness constraint. Created lazily on first join or action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable record id.
    pub hash: String,
    pub map_hash: String,
    /// Set for authenticated participants, `None` for guests.
    pub user_hash: Option<String>,
    /// Client-durable identity within the map; guests persist this across reconnects.
    pub participant_hash: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub tier: ParticipantTier,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub special_permissions: SpecialPermissions,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    pub fn is_banned(&self) -> bool {
        self.status == ParticipantStatus::Banned
    }
}

/// Per-participant permission overrides, merged on top of the tier grants
/// as the final, highest-priority layer. `None` means "no override".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_actions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_actions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_actions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_participants: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_participants: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_participants: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_permissions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_map_description: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_map_properties: Option<bool>,
}

impl SpecialPermissions {
    /// Apply every explicit override onto an effective permission set.
    pub fn apply_to(&self, permissions: &mut EffectivePermissions) {
        if let Some(view) = self.view {
            permissions.view = view;
        }
        if let Some(add_actions) = self.add_actions {
            permissions.add_actions = add_actions;
        }
        if let Some(edit_actions) = self.edit_actions {
            permissions.edit_actions = edit_actions;
        }
        if let Some(drop_actions) = self.drop_actions {
            permissions.drop_actions = drop_actions;
        }
        if let Some(invite_participants) = self.invite_participants {
            permissions.invite_participants = invite_participants;
        }
        if let Some(modify_participants) = self.modify_participants {
            permissions.modify_participants = modify_participants;
        }
        if let Some(ban_participants) = self.ban_participants {
            permissions.ban_participants = ban_participants;
        }
        if let Some(set_permissions) = self.set_permissions {
            permissions.set_permissions = set_permissions;
        }
        if let Some(change_map_description) = self.change_map_description {
            permissions.change_map_description = change_map_description;
        }
        if let Some(change_map_properties) = self.change_map_properties {
            permissions.change_map_properties = change_map_properties;
        }
    }
}

/// Effective permission set for one (participant, policy) pair.
///
/// Never persisted; recomputed per authorization check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermissions {
    pub view: bool,
    pub add_actions: bool,
    pub edit_actions: bool,
    pub drop_actions: bool,
    pub invite_participants: bool,
    pub modify_participants: bool,
    pub ban_participants: bool,
    pub set_permissions: bool,
    pub change_map_description: bool,
    pub change_map_properties: bool,
}

impl EffectivePermissions {
    pub const fn none() -> Self {
        Self {
            view: false,
            add_actions: false,
            edit_actions: false,
            drop_actions: false,
            invite_participants: false,
            modify_participants: false,
            ban_participants: false,
            set_permissions: false,
            change_map_description: false,
            change_map_properties: false,
        }
    }
}

/// Room-level edit policy. Stored on the permission record and exposed to
/// clients; evaluation beyond `anonymous_view` lives with the callers that
/// maintain allow-lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditRules {
    #[default]
    All,
    Creator,
    LoggedIn,
    CreatorAndModerators,
    AllowedUsers,
}

impl EditRules {
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::All => 0,
            Self::Creator => 1,
            Self::LoggedIn => 2,
            Self::CreatorAndModerators => 3,
            Self::AllowedUsers => 4,
        }
    }

    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::All),
            1 => Some(Self::Creator),
            2 => Some(Self::LoggedIn),
            3 => Some(Self::CreatorAndModerators),
            4 => Some(Self::AllowedUsers),
            _ => None,
        }
    }
}

/// Room-level permission settings, read from the external permission store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapPermissionPolicy {
    /// Whether unauthenticated participants may view the map.
    pub anonymous_view: bool,
    #[serde(default)]
    pub edit_rules: EditRules,
}

/// A map row as owned by the external map store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    pub hash: String,
    pub name: String,
    pub description: Option<String>,
    pub creator_hash: String,
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

/// Geographic coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Finite and inside WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Kind of a map action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    InitialPosition,
    Marker,
    Polyline,
    Polygon,
}

impl ActionKind {
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::InitialPosition => 0,
            Self::Marker => 1,
            Self::Polyline => 2,
            Self::Polygon => 3,
        }
    }

    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::InitialPosition),
            1 => Some(Self::Marker),
            2 => Some(Self::Polyline),
            3 => Some(Self::Polygon),
            _ => None,
        }
    }
}

/// Live/soft-deleted marker on an action row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Live,
    Deleted,
}

impl ActionStatus {
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::Live => 0,
            Self::Deleted => -1,
        }
    }

    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Live),
            -1 => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// An edit event on a map, owned by the external action store. Dropped
/// actions are soft-deleted: `status` flips to [`ActionStatus::Deleted`]
/// and `deleted_at` is set; the row is never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapAction {
    pub hash: String,
    pub map_hash: String,
    pub kind: ActionKind,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Participant hash of the author.
    pub creator_hash: String,
    pub status: ActionStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MapAction {
    pub fn coordinates(&self) -> Option<LatLng> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(LatLng { lat, lng }),
            _ => None,
        }
    }
}
