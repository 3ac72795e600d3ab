pub mod jwt;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use tracing::warn;
use uuid::Uuid;
use waypoint_common::protocol::ws::ANONYMOUS_ID_HEADER;

use crate::auth::jwt::JwtAccessTokenService;

/// Identity resolved from a connection's upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIdentity {
    /// Verified bearer token; carries the durable user hash.
    User { user_hash: String },
    /// Guest identity. `minted` is true when the server generated the id
    /// because the client supplied none.
    Anonymous { anon_id: String, minted: bool },
}

impl ResolvedIdentity {
    /// The identity key used by the connection registry.
    pub fn key(&self) -> &str {
        match self {
            Self::User { user_hash } => user_hash,
            Self::Anonymous { anon_id, .. } => anon_id,
        }
    }

    pub fn logged_in(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

/// Resolve the caller's identity from upgrade-request headers.
///
/// A present-and-valid bearer token wins; an invalid token degrades to the
/// anonymous path rather than rejecting the connection. Without an
/// `anonymous-id` header the server mints a fresh guest id the client is
/// expected to persist.
pub fn identity_from_headers(
    jwt_service: &JwtAccessTokenService,
    headers: &HeaderMap,
) -> ResolvedIdentity {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        match jwt_service.validate_access_token(token) {
            Ok(access) => return ResolvedIdentity::User { user_hash: access.user_hash },
            Err(error) => {
                warn!(error = %error, "bearer token failed validation, treating caller as guest");
            }
        }
    }

    match headers
        .get(ANONYMOUS_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(anon_id) => ResolvedIdentity::Anonymous { anon_id: anon_id.to_string(), minted: false },
        None => ResolvedIdentity::Anonymous { anon_id: mint_anon_id(), minted: true },
    }
}

pub fn mint_anon_id() -> String {
    format!("anon-{}", Uuid::new_v4().simple())
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}
