//! Password reset by emailed or texted token.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    account::AccountManager,
    auth::password,
    credentials::{random_code, RESET_TOKEN_RANGE},
    db::models::{PasswordResetToken, User},
    error::{ApiError, ApiResult},
    metrics,
    notify::{Channel, Notifier, Recipient},
};

pub struct PasswordResetFlow {
    db: SqlitePool,
    accounts: Arc<AccountManager>,
    notifier: Arc<dyn Notifier>,
    ttl: Duration,
}

impl PasswordResetFlow {
    pub fn new(
        db: SqlitePool,
        accounts: Arc<AccountManager>,
        notifier: Arc<dyn Notifier>,
        ttl: Duration,
    ) -> Self {
        Self {
            db,
            accounts,
            notifier,
            ttl,
        }
    }

    /// Create a reset token for the account behind exactly one identifier
    /// and send it over the matching channel. Returns the account id.
    pub async fn request(&self, email_address: &str, phone_number: &str) -> ApiResult<i64> {
        let channel = match (email_address.is_empty(), phone_number.is_empty()) {
            (true, true) => {
                return Err(ApiError::bad_request(
                    "provide either email address or phone number",
                ))
            }
            (false, false) => {
                return Err(ApiError::bad_request(
                    "provide either email address or phone number, not both",
                ))
            }
            (false, true) => Channel::Email,
            (true, false) => Channel::Sms,
        };

        let user = self
            .accounts
            .find_by_identifier("", email_address, phone_number)
            .await?
            .ok_or_else(|| ApiError::bad_request("user not found"))?;

        let token = random_code(RESET_TOKEN_RANGE);
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO password_reset_tokens (account_id, token, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user.account_id)
        .bind(&token)
        .bind((now + self.ttl).timestamp())
        .bind(now)
        .execute(&self.db)
        .await?;

        metrics::record_credential_event("reset_request", true);
        tracing::info!("Issued password reset token for account {}", user.account_id);

        if let Err(e) = self
            .notifier
            .send_password_reset(&Recipient::from(&user), channel, &token)
            .await
        {
            tracing::warn!(
                "Reset token delivery failed for account {}: {}",
                user.account_id,
                e
            );
        }

        Ok(user.account_id)
    }

    /// Spend a reset token on a new password. Also ends the live session.
    pub async fn confirm(&self, account_id: i64, token: &str, new_password: &str) -> ApiResult<()> {
        let result = self.redeem(account_id, token, new_password).await;
        metrics::record_credential_event("reset_confirm", result.is_ok());
        let user = result?;

        self.accounts.logout(account_id).await?;

        let recipient = Recipient::from(&user);
        for channel in [Channel::Email, Channel::Sms] {
            if let Err(e) = self
                .notifier
                .send_password_changed(&recipient, channel)
                .await
            {
                tracing::warn!(
                    "Password change notice failed for account {}: {}",
                    account_id,
                    e
                );
            }
        }

        Ok(())
    }

    /// Check the token, then delete it and write the new password together.
    /// Any failure before commit leaves the token spendable.
    async fn redeem(&self, account_id: i64, token: &str, new_password: &str) -> ApiResult<User> {
        if new_password.is_empty() {
            return Err(ApiError::bad_request("password is empty"));
        }

        let token = token.trim();
        if token.is_empty() || token.chars().all(|c| c == '0') {
            return Err(ApiError::bad_request("invalid token"));
        }

        let user = self.accounts.get_user(account_id).await?;

        let reset = sqlx::query_as::<_, PasswordResetToken>(
            "SELECT * FROM password_reset_tokens
             WHERE account_id = ?1 AND token = ?2
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(account_id)
        .bind(token)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::bad_request("invalid token"))?;

        if Utc::now().timestamp() > reset.expires_at {
            return Err(ApiError::bad_request("expired token"));
        }

        let hash = password::hash_password_blocking(new_password.to_string()).await?;

        let mut tx = self.db.begin().await?;

        let deleted = sqlx::query("DELETE FROM password_reset_tokens WHERE id = ?1")
            .bind(reset.id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(ApiError::bad_request("invalid token"));
        }

        AccountManager::store_password_hash(&mut tx, account_id, &hash).await?;
        tx.commit().await?;

        Ok(user)
    }
}
