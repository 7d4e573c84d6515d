//! Session token creation and verification.
//!
//! A session token is an HS256 JWT over [`SessionClaims`]. Signature and
//! `exp` checks happen here; the liveness check against the stored token on
//! the user row is done by the session strategy.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::AuthConfig,
    db::models::User,
    error::{ApiError, ApiResult},
};

/// Claims signed into a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "type")]
    pub account_type: String,
    pub account_id: i64,
    /// Random per-issuance correlation id
    pub access_uuid: String,
    pub authorised: bool,
    pub universal_access: bool,
    pub exp: i64,
}

/// A freshly signed token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub access_uuid: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a bearer token was rejected; callers only surface a generic message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token claims are incomplete")]
    MissingClaims,
    #[error("token is not authorised")]
    NotAuthorised,
}

/// Signs and verifies session tokens with the server secret
#[derive(Clone)]
pub struct SessionTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl SessionTokenCodec {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            Duration::hours(config.access_token_ttl_hours),
        )
    }

    /// Issue a token for `user`. The caller stores token and expiry on the
    /// user row, which replaces any previous session.
    pub fn issue(&self, user: &User, universal_access: bool) -> ApiResult<IssuedToken> {
        let expires_at = Utc::now() + self.ttl;
        let access_uuid = Uuid::new_v4().to_string();

        let claims = SessionClaims {
            account_type: user.account_type.clone(),
            account_id: user.account_id,
            access_uuid: access_uuid.clone(),
            authorised: true,
            universal_access,
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("Failed to sign session token: {}", e)))?;

        // Second precision, matching what is stored on the user row
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or(expires_at);

        Ok(IssuedToken {
            token,
            access_uuid,
            expires_at,
        })
    }

    /// Verify signature and expiry, then check the claim set is complete
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<serde_json::Value>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                ErrorKind::MissingRequiredClaim(_) => TokenError::MissingClaims,
                _ => TokenError::Malformed,
            },
        )?;

        let claims: SessionClaims =
            serde_json::from_value(data.claims).map_err(|_| TokenError::MissingClaims)?;

        if !claims.authorised {
            return Err(TokenError::NotAuthorised);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_user, TEST_JWT_SECRET};

    fn codec() -> SessionTokenCodec {
        SessionTokenCodec::new(TEST_JWT_SECRET, Duration::hours(1))
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let user = sample_user(42, "business");
        let issued = codec().issue(&user, false).unwrap();

        let claims = codec().verify(&issued.token).unwrap();
        assert_eq!(claims.account_id, 42);
        assert_eq!(claims.account_type, "business");
        assert_eq!(claims.access_uuid, issued.access_uuid);
        assert!(claims.authorised);
        assert!(!claims.universal_access);
        assert_eq!(claims.exp, issued.expires_at.timestamp());
    }

    #[test]
    fn test_each_issuance_has_a_fresh_correlation_id() {
        let user = sample_user(1, "individual");
        let a = codec().issue(&user, false).unwrap();
        let b = codec().issue(&user, false).unwrap();
        assert_ne!(a.access_uuid, b.access_uuid);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let user = sample_user(1, "individual");
        let issued = codec().issue(&user, false).unwrap();

        let other = SessionTokenCodec::new("another-secret-that-is-long-enough!!", Duration::hours(1));
        assert_eq!(other.verify(&issued.token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let expired = SessionTokenCodec::new(TEST_JWT_SECRET, Duration::seconds(-120));
        let issued = expired.issue(&sample_user(1, "individual"), false).unwrap();
        assert_eq!(codec().verify(&issued.token), Err(TokenError::Expired));
    }

    #[test]
    fn test_malformed_tokens_are_rejected() {
        for token in ["", "invalid", "not.a.token", "too.many.parts.in.this.token"] {
            assert_eq!(
                codec().verify(token),
                Err(TokenError::Malformed),
                "token {:?}",
                token
            );
        }
    }

    #[test]
    fn test_missing_claims_are_rejected() {
        let claims = serde_json::json!({
            "account_id": 9,
            "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(codec().verify(&token), Err(TokenError::MissingClaims));
    }

    #[test]
    fn test_unauthorised_claims_are_rejected() {
        let claims = SessionClaims {
            account_type: "individual".into(),
            account_id: 3,
            access_uuid: Uuid::new_v4().to_string(),
            authorised: false,
            universal_access: false,
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(codec().verify(&token), Err(TokenError::NotAuthorised));
    }
}
