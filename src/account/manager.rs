/// Account manager implementation using runtime queries
///
/// Owns the user rows: identifier lookups, the ban predicate, password
/// checks, and the single stored session token each user carries.

use crate::{
    account::{ClientInfo, Identity, LoginRequest, LoginResponse},
    auth::{
        password,
        token::{SessionTokenCodec, TokenError},
    },
    db::models::User,
    error::{ApiError, ApiResult},
    metrics,
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

/// Why a bearer token failed the stored-session check.
///
/// These stay internal; callers see a single generic rejection.
#[derive(Debug, Error)]
pub enum SessionRejection {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("account not found")]
    UnknownAccount,
    #[error("token does not match the stored session")]
    TokenMismatch,
    #[error("stored session has expired")]
    StoredSessionExpired,
    #[error("store failure: {0}")]
    Store(#[from] sqlx::Error),
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    codec: SessionTokenCodec,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, codec: SessionTokenCodec) -> Self {
        Self { db, codec }
    }

    /// Get a user by account id
    pub async fn get_user(&self, account_id: i64) -> ApiResult<User> {
        self.find_user(account_id)
            .await?
            .ok_or_else(|| ApiError::bad_request("user not found"))
    }

    pub async fn find_user(&self, account_id: i64) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    /// Find a user by any supplied identifier. Empty identifiers are ignored.
    pub async fn find_by_identifier(
        &self,
        username: &str,
        email_address: &str,
        phone_number: &str,
    ) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE (?1 != '' AND username = ?1)
                OR (?2 != '' AND email_address = ?2)
                OR (?3 != '' AND phone_number = ?3)
             ORDER BY id
             LIMIT 1",
        )
        .bind(username)
        .bind(email_address)
        .bind(phone_number)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    /// Search users by name, username, email, phone or account id
    pub async fn search_users(&self, search: &str) -> ApiResult<Vec<User>> {
        let search = search.trim();
        let pattern = format!("%{}%", search);

        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE ?1 = ''
                OR CAST(account_id AS TEXT) = ?1
                OR username LIKE ?2
                OR email_address LIKE ?2
                OR phone_number LIKE ?2
                OR firstname LIKE ?2
                OR lastname LIKE ?2
             ORDER BY id
             LIMIT 100",
        )
        .bind(search)
        .bind(&pattern)
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }

    /// Presence of a ban row is the ban
    pub async fn is_banned(&self, account_id: i64) -> ApiResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM banned_accounts WHERE account_id = ?1")
                .bind(account_id)
                .fetch_one(&self.db)
                .await?;

        Ok(count > 0)
    }

    /// Authenticate with a password and issue a session.
    ///
    /// Unknown accounts and wrong passwords are indistinguishable.
    pub async fn login(&self, req: &LoginRequest, client: &ClientInfo) -> ApiResult<LoginResponse> {
        if req.username.is_empty() && req.email_address.is_empty() && req.phone_number.is_empty()
        {
            return Err(ApiError::bad_request(
                "provide either username, email_address, or phone_number",
            ));
        }

        let user = match self
            .find_by_identifier(&req.username, &req.email_address, &req.phone_number)
            .await?
        {
            Some(user) => user,
            None => {
                password::verify_unmatched(req.password.clone()).await?;
                metrics::record_credential_event("login", false);
                return Err(ApiError::bad_request("invalid login details"));
            }
        };

        if self.is_banned(user.account_id).await? {
            tracing::warn!("Login refused for banned account {}", user.account_id);
            metrics::record_credential_event("login", false);
            return Err(ApiError::bad_request("this account has been banned"));
        }

        let matches =
            password::verify_password_blocking(req.password.clone(), user.password.clone()).await?;
        if !matches {
            tracing::warn!("Password mismatch for account {}", user.account_id);
            metrics::record_credential_event("login", false);
            return Err(ApiError::bad_request("invalid login details"));
        }

        metrics::record_credential_event("login", true);
        self.issue_session(user, client).await
    }

    /// Record the login, issue a token and store it on the user row,
    /// replacing any previous session.
    pub async fn issue_session(&self, user: User, client: &ClientInfo) -> ApiResult<LoginResponse> {
        if let Err(e) = self.track_login(user.account_id, client).await {
            tracing::warn!("Failed to record login for account {}: {}", user.account_id, e);
        }

        let issued = self.codec.issue(&user, false)?;

        sqlx::query(
            "UPDATE users
             SET login_access_token = ?1, login_access_token_expires_in = ?2, updated_at = ?3
             WHERE account_id = ?4",
        )
        .bind(&issued.token)
        .bind(issued.expires_at.timestamp())
        .bind(Utc::now())
        .bind(user.account_id)
        .execute(&self.db)
        .await?;

        let login_count = self.login_count(user.account_id).await?;
        let user = self.get_user(user.account_id).await?;

        metrics::record_session_issued();
        tracing::info!("Issued session for account {}", user.account_id);

        Ok(LoginResponse {
            token_type: "auth".to_string(),
            access_token: issued.token,
            expires_in: issued.expires_at,
            login_count,
            user,
        })
    }

    /// Verify a bearer token and check it is still the stored session
    pub async fn authenticate(&self, bearer: &str) -> Result<Identity, SessionRejection> {
        let claims = self.codec.verify(bearer)?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE account_id = ?1")
            .bind(claims.account_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(SessionRejection::UnknownAccount)?;

        if user.login_access_token.is_empty() || user.login_access_token != bearer {
            return Err(SessionRejection::TokenMismatch);
        }

        match user.login_access_token_expires_in {
            Some(expires_at) if Utc::now().timestamp() <= expires_at => {}
            _ => return Err(SessionRejection::StoredSessionExpired),
        }

        Ok(Identity {
            account_id: user.account_id,
            account_type: user.account_type,
        })
    }

    /// Clear the stored session so the bearer stops being accepted
    pub async fn logout(&self, account_id: i64) -> ApiResult<()> {
        let result = sqlx::query(
            "UPDATE users
             SET login_access_token = '', login_access_token_expires_in = ?1, updated_at = ?2
             WHERE account_id = ?3",
        )
        .bind(Utc::now().timestamp())
        .bind(Utc::now())
        .bind(account_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::bad_request("user not found"));
        }

        tracing::info!("Cleared session for account {}", account_id);
        Ok(())
    }

    /// Change password after checking the current one
    pub async fn update_password(
        &self,
        account_id: i64,
        old_password: &str,
        new_password: &str,
    ) -> ApiResult<()> {
        let user = self.get_user(account_id).await?;

        if !password::verify_password_blocking(old_password.to_string(), user.password.clone())
            .await?
        {
            metrics::record_credential_event("password_update", false);
            return Err(ApiError::bad_request("incorrect password"));
        }

        if new_password.is_empty() {
            return Err(ApiError::bad_request("password is empty"));
        }

        self.set_password(account_id, new_password).await?;
        metrics::record_credential_event("password_update", true);

        Ok(())
    }

    /// Hash and store a new password
    pub async fn set_password(&self, account_id: i64, new_password: &str) -> ApiResult<()> {
        let hash = password::hash_password_blocking(new_password.to_string()).await?;
        let mut conn = self.db.acquire().await?;
        Self::store_password_hash(&mut conn, account_id, &hash).await
    }

    /// Write an already hashed password, inside a caller's transaction if need be
    pub async fn store_password_hash(
        conn: &mut SqliteConnection,
        account_id: i64,
        hash: &str,
    ) -> ApiResult<()> {
        let result =
            sqlx::query("UPDATE users SET password = ?1, updated_at = ?2 WHERE account_id = ?3")
                .bind(hash)
                .bind(Utc::now())
                .bind(account_id)
                .execute(&mut *conn)
                .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::bad_request("user not found"));
        }

        tracing::info!("Password changed for account {}", account_id);
        Ok(())
    }

    /// Set the trust tier directly
    pub async fn set_tier(&self, account_id: i64, tier: i64) -> ApiResult<()> {
        sqlx::query("UPDATE users SET tier_type = ?1, updated_at = ?2 WHERE account_id = ?3")
            .bind(tier)
            .bind(Utc::now())
            .bind(account_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Record a successful login
    async fn track_login(&self, account_id: i64, client: &ClientInfo) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO user_trackings (account_id, ip_address, browser, location, created_at)
             VALUES (?1, ?2, ?3, '', ?4)",
        )
        .bind(account_id)
        .bind(&client.ip_address)
        .bind(&client.user_agent)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Number of recorded logins for an account
    pub async fn login_count(&self, account_id: i64) -> ApiResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_trackings WHERE account_id = ?1")
                .bind(account_id)
                .fetch_one(&self.db)
                .await?;

        Ok(count)
    }
}
