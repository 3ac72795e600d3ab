use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    /// The durable user hash.
    sub: String,
    iat: i64,
    exp: i64,
}

/// Verified identity extracted from an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccess {
    pub user_hash: String,
}

/// Issues and validates HS256 access tokens. Token *issuance* belongs to
/// the external account service; the issue path here exists for tests and
/// local development.
#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_access_token(&self, user_hash: &str) -> anyhow::Result<String> {
        self.issue_access_token_at(user_hash, current_unix_timestamp()?)
    }

    fn issue_access_token_at(&self, user_hash: &str, issued_at: i64) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: user_hash.to_string(),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn validate_access_token(&self, token: &str) -> anyhow::Result<UserAccess> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(anyhow!("access token subject is empty"));
        }

        Ok(UserAccess { user_hash: claims.sub })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, JwtAccessTokenService, ACCESS_TOKEN_TTL_SECONDS};

    const TEST_SECRET: &str = "waypoint_test_secret_that_is_definitely_long_enough";

    #[test]
    fn issues_and_validates_access_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");

        let token = service.issue_access_token("user-1").expect("token should be issued");
        let access = service.validate_access_token(&token).expect("token should validate");

        assert_eq!(access.user_hash, "user-1");
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue_access_token("user-1").expect("token should be issued");

        let mut tampered = token.clone();
        tampered.replace_range(tampered.len() - 2.., "xx");

        assert!(service.validate_access_token(&tampered).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let issued_at = current_unix_timestamp().expect("timestamp should be readable")
            - ACCESS_TOKEN_TTL_SECONDS
            - 60;
        let token = service
            .issue_access_token_at("user-1", issued_at)
            .expect("token should be issued");

        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn rejects_tokens_signed_with_a_different_secret() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let other = JwtAccessTokenService::new("another_secret_that_is_also_long_enough_ok")
            .expect("service should initialize");

        let token = other.issue_access_token("user-1").expect("token should be issued");
        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(JwtAccessTokenService::new("too-short").is_err());
    }
}
