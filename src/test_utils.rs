//! Shared fixtures for in-module tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::{
    auth::{password, token::SessionTokenCodec},
    config::{
        AuthConfig, CollaboratorConfig, CredentialConfig, RateLimitConfig,
        ServerConfig, ServiceConfig, StorageConfig,
    },
    context::AppContext,
    credentials::ApiKeyManager,
    db::{self, models::User},
    error::{ApiError, ApiResult},
    notify::{Channel, Notifier, Recipient},
    verification::{Verification, VerificationSource},
};

pub const TEST_JWT_SECRET: &str = "test-secret-with-at-least-32-characters!";
pub const TEST_APP_KEY: &str = "test-app-key";

pub fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "127.0.0.1".to_string(),
            port: 8019,
            app_name: "auth".to_string(),
            version: "test".to_string(),
        },
        storage: StorageConfig {
            database: ":memory:".into(),
            max_connections: 1,
        },
        authentication: AuthConfig {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            access_token_ttl_hours: 24,
            app_key: TEST_APP_KEY.to_string(),
        },
        credentials: CredentialConfig {
            otp_ttl_minutes: 30,
            reset_token_ttl_minutes: 30,
        },
        collaborators: CollaboratorConfig {
            notification_url: None,
            verification_url: None,
            timeout_secs: 1,
        },
        email: None,
        rate_limit: RateLimitConfig {
            enabled: false,
            credential_requests_per_minute: 30,
            trust_proxy_headers: false,
        },
    }
}

/// One connection so every query sees the same in-memory database
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn test_codec() -> SessionTokenCodec {
    SessionTokenCodec::new(TEST_JWT_SECRET, Duration::hours(24))
}

/// Context with recording notifications and no verification records
pub async fn test_context() -> (AppContext, Arc<RecordingNotifier>) {
    test_context_with(test_config()).await
}

pub async fn test_context_with(config: ServerConfig) -> (AppContext, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let pool = test_pool().await;
    let api_keys = Arc::new(ApiKeyManager::new(
        pool.clone(),
        config.service.app_name.clone(),
    ));
    let ctx = AppContext::from_parts(
        config,
        pool,
        api_keys,
        notifier.clone(),
        Arc::new(StaticVerifications::default()),
    );
    (ctx, notifier)
}

/// In-memory user, never stored
pub fn sample_user(account_id: i64, account_type: &str) -> User {
    let now = Utc::now();
    User {
        id: account_id,
        account_id,
        account_type: account_type.to_string(),
        firstname: "Test".to_string(),
        lastname: "User".to_string(),
        email_address: format!("user{}@example.com", account_id),
        phone_number: format!("+234{:07}", account_id),
        username: format!("user{}", account_id),
        password: String::new(),
        tier_type: 0,
        login_access_token: String::new(),
        login_access_token_expires_in: None,
        created_at: now,
        updated_at: now,
    }
}

pub struct NewUser {
    account_id: i64,
    account_type: String,
    firstname: String,
    username: String,
    phone_number: String,
    password: String,
    tier: i64,
}

impl NewUser {
    pub fn new(account_id: i64) -> Self {
        Self {
            account_id,
            account_type: "individual".to_string(),
            firstname: "Test".to_string(),
            username: format!("user{}", account_id),
            phone_number: format!("+234{:07}", account_id),
            password: String::new(),
            tier: 0,
        }
    }

    pub fn account_type(mut self, account_type: &str) -> Self {
        self.account_type = account_type.to_string();
        self
    }

    pub fn firstname(mut self, firstname: &str) -> Self {
        self.firstname = firstname.to_string();
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    pub fn phone(mut self, phone: &str) -> Self {
        self.phone_number = phone.to_string();
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn tier(mut self, tier: i64) -> Self {
        self.tier = tier;
        self
    }
}

pub async fn insert_user(pool: &SqlitePool, user: NewUser) -> User {
    let hash = if user.password.is_empty() {
        String::new()
    } else {
        password::hash_password(&user.password).unwrap()
    };
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO users (account_id, account_type, firstname, lastname, email_address,
                            phone_number, username, password, tier_type, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'User', ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
    )
    .bind(user.account_id)
    .bind(&user.account_type)
    .bind(&user.firstname)
    .bind(format!("user{}@example.com", user.account_id))
    .bind(&user.phone_number)
    .bind(&user.username)
    .bind(&hash)
    .bind(user.tier)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();

    sqlx::query_as::<_, User>("SELECT * FROM users WHERE account_id = ?1")
        .bind(user.account_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn ban_account(pool: &SqlitePool, account_id: i64) {
    sqlx::query("INSERT INTO banned_accounts (account_id, created_at) VALUES (?1, ?2)")
        .bind(account_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
}

#[derive(Default)]
struct Sent {
    otps: Vec<(i64, String)>,
    resets: Vec<(i64, Channel, String)>,
    password_changes: Vec<(i64, Channel)>,
}

/// Notifier that keeps what it was asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Sent>,
    fail: bool,
}

impl RecordingNotifier {
    /// Records nothing and fails every send
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn otps(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().otps.clone()
    }

    pub fn resets(&self) -> Vec<(i64, Channel, String)> {
        self.sent.lock().unwrap().resets.clone()
    }

    pub fn password_changes(&self) -> Vec<(i64, Channel)> {
        self.sent.lock().unwrap().password_changes.clone()
    }

    fn check(&self) -> ApiResult<()> {
        if self.fail {
            Err(ApiError::Upstream("notification service down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_otp(&self, recipient: &Recipient, code: &str) -> ApiResult<()> {
        self.check()?;
        self.sent
            .lock()
            .unwrap()
            .otps
            .push((recipient.account_id, code.to_string()));
        Ok(())
    }

    async fn send_password_reset(
        &self,
        recipient: &Recipient,
        channel: Channel,
        token: &str,
    ) -> ApiResult<()> {
        self.check()?;
        self.sent
            .lock()
            .unwrap()
            .resets
            .push((recipient.account_id, channel, token.to_string()));
        Ok(())
    }

    async fn send_password_changed(
        &self,
        recipient: &Recipient,
        channel: Channel,
    ) -> ApiResult<()> {
        self.check()?;
        self.sent
            .lock()
            .unwrap()
            .password_changes
            .push((recipient.account_id, channel));
        Ok(())
    }
}

/// Verification source with fixed records
#[derive(Default)]
pub struct StaticVerifications {
    records: Vec<Verification>,
    fail: bool,
}

impl StaticVerifications {
    pub fn new(records: Vec<Verification>) -> Self {
        Self {
            records,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            records: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl VerificationSource for StaticVerifications {
    async fn verifications(&self, _account_id: i64) -> ApiResult<Vec<Verification>> {
        if self.fail {
            return Err(ApiError::Upstream("verification service down".to_string()));
        }
        Ok(self.records.clone())
    }
}
