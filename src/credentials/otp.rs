//! One-time passcodes.
//!
//! Each account holds at most one live code. Issuing replaces the previous
//! code; a successful validation consumes it and issues a session.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    account::{AccountManager, ClientInfo, LoginResponse},
    credentials::{random_code, OTP_RANGE},
    db::models::OtpCode,
    error::{ApiError, ApiResult},
    metrics,
    notify::{Notifier, Recipient},
};

pub struct OtpService {
    db: SqlitePool,
    accounts: Arc<AccountManager>,
    notifier: Arc<dyn Notifier>,
    ttl: Duration,
}

impl OtpService {
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

    /// Replace the account's code with a fresh one and send it
    pub async fn issue(&self, account_id: i64) -> ApiResult<()> {
        let user = self.accounts.get_user(account_id).await?;
        let code = random_code(OTP_RANGE);
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM otp_verification WHERE account_id = ?1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO otp_verification (account_id, otp_token, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(account_id)
        .bind(&code)
        .bind(now + self.ttl)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        metrics::record_credential_event("otp_issue", true);
        tracing::info!("Issued OTP for account {}", account_id);

        if let Err(e) = self.notifier.send_otp(&Recipient::from(&user), &code).await {
            tracing::warn!("OTP delivery failed for account {}: {}", account_id, e);
        }

        Ok(())
    }

    /// Check a code, consume it and log the account in
    pub async fn validate(
        &self,
        account_id: i64,
        code: &str,
        client: &ClientInfo,
    ) -> ApiResult<LoginResponse> {
        let result = self.consume(account_id, code).await;
        metrics::record_credential_event("otp_validate", result.is_ok());
        result?;

        let user = self.accounts.get_user(account_id).await?;
        self.accounts.issue_session(user, client).await
    }

    /// Start a passwordless login: send a code to the phone's owner and
    /// return their account id for the validation step.
    pub async fn login_by_phone(&self, phone_number: &str) -> ApiResult<i64> {
        let phone_number = phone_number.trim();
        if phone_number.is_empty() {
            return Err(ApiError::bad_request("phone number is required"));
        }

        let user = self
            .accounts
            .find_by_identifier("", "", phone_number)
            .await?
            .ok_or_else(|| ApiError::bad_request("user not found"))?;

        if self.accounts.is_banned(user.account_id).await? {
            return Err(ApiError::bad_request("this account has been banned"));
        }

        self.issue(user.account_id).await?;
        Ok(user.account_id)
    }

    async fn consume(&self, account_id: i64, code: &str) -> ApiResult<()> {
        let otp = sqlx::query_as::<_, OtpCode>(
            "SELECT * FROM otp_verification WHERE account_id = ?1 ORDER BY id DESC LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::bad_request("invalid otp"))?;

        if otp.otp_token != code {
            tracing::warn!("OTP mismatch for account {}", account_id);
            return Err(ApiError::bad_request("invalid token"));
        }

        if Utc::now() > otp.expires_at {
            return Err(ApiError::bad_request("token expired"));
        }

        if self.accounts.is_banned(account_id).await? {
            return Err(ApiError::bad_request("this account has been banned"));
        }

        let deleted = sqlx::query("DELETE FROM otp_verification WHERE id = ?1")
            .bind(otp.id)
            .execute(&self.db)
            .await?;

        // Lost a race with another validation of the same code
        if deleted.rows_affected() == 0 {
            return Err(ApiError::bad_request("invalid otp"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        ban_account, insert_user, test_codec, test_pool, NewUser, RecordingNotifier,
    };

    struct Fixture {
        service: OtpService,
        accounts: Arc<AccountManager>,
        notifier: Arc<RecordingNotifier>,
        db: SqlitePool,
    }

    async fn setup() -> Fixture {
        let db = test_pool().await;
        insert_user(&db, NewUser::new(7)).await;
        let accounts = Arc::new(AccountManager::new(db.clone(), test_codec()));
        let notifier = Arc::new(RecordingNotifier::default());
        let service = OtpService::new(
            db.clone(),
            accounts.clone(),
            notifier.clone(),
            Duration::minutes(30),
        );
        Fixture {
            service,
            accounts,
            notifier,
            db,
        }
    }

    async fn otp_rows(db: &SqlitePool, account_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM otp_verification WHERE account_id = ?1")
            .bind(account_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_sends_six_digit_code() {
        let f = setup().await;
        f.service.issue(7).await.unwrap();

        let sent = f.notifier.otps();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 7);
        let code: u32 = sent[0].1.parse().unwrap();
        assert!(OTP_RANGE.contains(&code));
        assert_eq!(otp_rows(&f.db, 7).await, 1);
    }

    #[tokio::test]
    async fn test_reissue_supersedes_previous_code() {
        let f = setup().await;
        f.service.issue(7).await.unwrap();
        f.service.issue(7).await.unwrap();

        assert_eq!(otp_rows(&f.db, 7).await, 1);

        let sent = f.notifier.otps();
        let (first, second) = (&sent[0].1, &sent[1].1);
        if first != second {
            let err = f
                .service
                .validate(7, first, &ClientInfo::default())
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "invalid token");
        }
        assert!(f
            .service
            .validate(7, second, &ClientInfo::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let f = setup().await;
        f.service.issue(7).await.unwrap();
        sqlx::query("UPDATE otp_verification SET otp_token = '482913' WHERE account_id = 7")
            .execute(&f.db)
            .await
            .unwrap();

        let response = f
            .service
            .validate(7, "482913", &ClientInfo::default())
            .await
            .unwrap();
        assert_eq!(response.token_type, "auth");
        assert!(f.accounts.authenticate(&response.access_token).await.is_ok());

        let err = f
            .service
            .validate(7, "482913", &ClientInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid otp");
    }

    #[tokio::test]
    async fn test_expired_code() {
        let f = setup().await;
        f.service.issue(7).await.unwrap();
        let code = f.notifier.otps()[0].1.clone();

        sqlx::query("UPDATE otp_verification SET expires_at = ?1 WHERE account_id = 7")
            .bind(Utc::now() - Duration::minutes(1))
            .execute(&f.db)
            .await
            .unwrap();

        let err = f
            .service
            .validate(7, &code, &ClientInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "token expired");
    }

    #[tokio::test]
    async fn test_banned_account_cannot_use_code() {
        let f = setup().await;
        f.service.issue(7).await.unwrap();
        let code = f.notifier.otps()[0].1.clone();
        ban_account(&f.db, 7).await;

        let err = f
            .service
            .validate(7, &code, &ClientInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "this account has been banned");
    }

    #[tokio::test]
    async fn test_no_code_issued() {
        let f = setup().await;
        let err = f
            .service
            .validate(7, "123456", &ClientInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid otp");
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let f = setup().await;
        assert!(f.service.issue(404).await.is_err());
        assert!(f.notifier.otps().is_empty());
    }

    #[tokio::test]
    async fn test_login_by_phone_sends_code() {
        let f = setup().await;

        let account_id = f.service.login_by_phone("+2340000007").await.unwrap();
        assert_eq!(account_id, 7);
        assert_eq!(f.notifier.otps().len(), 1);

        let unknown = f.service.login_by_phone("+2349999999").await.unwrap_err();
        assert_eq!(unknown.to_string(), "user not found");

        ban_account(&f.db, 7).await;
        let banned = f.service.login_by_phone("+2340000007").await.unwrap_err();
        assert_eq!(banned.to_string(), "this account has been banned");
        assert_eq!(f.notifier.otps().len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_fail_issue() {
        let db = test_pool().await;
        insert_user(&db, NewUser::new(7)).await;
        let accounts = Arc::new(AccountManager::new(db.clone(), test_codec()));
        let service = OtpService::new(
            db.clone(),
            accounts,
            Arc::new(RecordingNotifier::failing()),
            Duration::minutes(30),
        );

        tokio_test::assert_ok!(service.issue(7).await);
        assert_eq!(otp_rows(&db, 7).await, 1);
    }
}
