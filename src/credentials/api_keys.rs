//! Service-to-service API key pairs.
//!
//! One row per account, rotated in place. Keys look like
//! `v_<app-name>_<50 alphanumerics>`.

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::{
    db::models::AccessToken,
    error::{ApiError, ApiResult},
    metrics,
};

const KEY_SUFFIX_LEN: usize = 50;

/// Why a presented key pair was refused
#[derive(Debug, Error)]
pub enum KeyRejection {
    #[error("missing api keys")]
    Missing,
    #[error("either public or private key is missing")]
    PartiallyMissing,
    #[error("invalid keys")]
    Invalid,
    #[error("server error")]
    Store(#[from] sqlx::Error),
}

impl From<KeyRejection> for ApiError {
    fn from(rejection: KeyRejection) -> Self {
        match rejection {
            KeyRejection::Store(e) => ApiError::Database(e),
            other => ApiError::unauthorized(other.to_string()),
        }
    }
}

pub struct ApiKeyManager {
    db: SqlitePool,
    app_name: String,
}

impl ApiKeyManager {
    pub fn new(db: SqlitePool, app_name: impl Into<String>) -> Self {
        Self {
            db,
            app_name: app_name.into(),
        }
    }

    fn generate_key(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(KEY_SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("v_{}_{}", self.app_name, suffix)
    }

    async fn ensure_account(&self, account_id: i64) -> ApiResult<()> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE account_id = ?1")
            .bind(account_id)
            .fetch_one(&self.db)
            .await?;

        if exists == 0 {
            return Err(ApiError::bad_request("user not found"));
        }
        Ok(())
    }

    async fn find_by_account(&self, account_id: i64) -> ApiResult<Option<AccessToken>> {
        let token =
            sqlx::query_as::<_, AccessToken>("SELECT * FROM access_tokens WHERE account_id = ?1")
                .bind(account_id)
                .fetch_optional(&self.db)
                .await?;

        Ok(token)
    }

    /// Issue a fresh live pair for an account, creating its row on first use
    pub async fn issue(&self, account_id: i64) -> ApiResult<AccessToken> {
        self.ensure_account(account_id).await?;

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO access_tokens (account_id, public_key, private_key, is_live, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT(account_id) DO UPDATE SET
                public_key = excluded.public_key,
                private_key = excluded.private_key,
                is_live = 1,
                updated_at = excluded.updated_at",
        )
        .bind(account_id)
        .bind(self.generate_key())
        .bind(self.generate_key())
        .bind(now)
        .execute(&self.db)
        .await?;

        metrics::record_credential_event("api_key_issue", true);
        tracing::info!("Issued API key pair for account {}", account_id);

        self.find_by_account(account_id)
            .await?
            .ok_or_else(|| ApiError::Internal("issued key pair not found".to_string()))
    }

    /// Rotate an existing pair so the old keys stop working
    pub async fn revoke(&self, account_id: i64) -> ApiResult<AccessToken> {
        self.ensure_account(account_id).await?;

        if self.find_by_account(account_id).await?.is_none() {
            return Err(ApiError::bad_request("no token found for this user"));
        }

        sqlx::query(
            "UPDATE access_tokens SET public_key = ?1, private_key = ?2, updated_at = ?3
             WHERE account_id = ?4",
        )
        .bind(self.generate_key())
        .bind(self.generate_key())
        .bind(Utc::now())
        .bind(account_id)
        .execute(&self.db)
        .await?;

        metrics::record_credential_event("api_key_revoke", true);
        tracing::info!("Revoked API key pair for account {}", account_id);

        self.find_by_account(account_id)
            .await?
            .ok_or_else(|| ApiError::Internal("revoked key pair not found".to_string()))
    }

    /// Check a presented pair. The row is located by either key; both keys
    /// must then match that row.
    pub async fn validate(
        &self,
        public_key: &str,
        private_key: &str,
    ) -> Result<AccessToken, KeyRejection> {
        match (public_key.is_empty(), private_key.is_empty()) {
            (true, true) => return Err(KeyRejection::Missing),
            (true, false) | (false, true) => return Err(KeyRejection::PartiallyMissing),
            _ => {}
        }

        let token = sqlx::query_as::<_, AccessToken>(
            "SELECT * FROM access_tokens
             WHERE (public_key = ?1 OR private_key = ?2) AND is_live = 1
             ORDER BY id
             LIMIT 1",
        )
        .bind(public_key)
        .bind(private_key)
        .fetch_optional(&self.db)
        .await?
        .ok_or(KeyRejection::Invalid)?;

        let public_matches = token.public_key.as_bytes().ct_eq(public_key.as_bytes());
        let private_matches = token.private_key.as_bytes().ct_eq(private_key.as_bytes());
        if !bool::from(public_matches & private_matches) {
            return Err(KeyRejection::Invalid);
        }

        Ok(token)
    }

    /// Look up a live pair by either of its keys
    pub async fn find_by_key(&self, key: &str) -> ApiResult<AccessToken> {
        if key.is_empty() {
            return Err(ApiError::bad_request("key is required"));
        }

        sqlx::query_as::<_, AccessToken>(
            "SELECT * FROM access_tokens
             WHERE (public_key = ?1 OR private_key = ?1) AND is_live = 1
             LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::bad_request("access token not found"))
    }

    /// The pair this service presents to its own collaborators
    pub async fn service_credentials(&self) -> ApiResult<AccessToken> {
        sqlx::query_as::<_, AccessToken>(
            "SELECT * FROM access_tokens WHERE is_live = 1 ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::Internal("no live API key for outbound calls".to_string()))
    }
}
