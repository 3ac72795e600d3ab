//! Effective permission computation.
//!
//! Pure layering over a participant record and the room policy, with no
//! store access. Precedence, lowest to highest:
//!
//! 1. ban short-circuit (banned participants get nothing)
//! 2. base viewability from the policy and login state
//! 3. cumulative tier grants
//! 4. per-participant special overrides

use waypoint_common::types::{
    EffectivePermissions, MapPermissionPolicy, Participant, ParticipantTier,
};

/// Compute the effective permission set for one participant under one
/// room policy. Deterministic; safe to recompute on every check.
pub fn compute(participant: &Participant, policy: &MapPermissionPolicy) -> EffectivePermissions {
    if participant.is_banned() {
        return EffectivePermissions::none();
    }

    let mut permissions = EffectivePermissions::none();
    permissions.view = policy.anonymous_view || participant.user_hash.is_some();

    // Each tier grants a superset of the tiers below it.
    if participant.tier >= ParticipantTier::Editor {
        permissions.add_actions = true;
        permissions.edit_actions = true;
        permissions.drop_actions = true;
    }
    if participant.tier >= ParticipantTier::Moderator {
        permissions.invite_participants = true;
        permissions.modify_participants = true;
        permissions.ban_participants = true;
    }
    if participant.tier >= ParticipantTier::Admin {
        permissions.change_map_description = true;
        permissions.change_map_properties = true;
    }
    if participant.tier >= ParticipantTier::Creator {
        permissions.set_permissions = true;
    }

    participant.special_permissions.apply_to(&mut permissions);
    permissions
}
