/// Credential store records
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account type that passes the business-admin gate
pub const ADMIN_ACCOUNT_TYPE: &str = "admin";

/// User record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub account_id: i64,
    /// individual, business, admin or others
    pub account_type: String,
    pub firstname: String,
    pub lastname: String,
    pub email_address: String,
    pub phone_number: String,
    pub username: String,
    /// Argon2id hash
    #[serde(skip_serializing, default)]
    pub password: String,
    pub tier_type: i64,
    /// The single live session token; empty after logout
    #[serde(skip_serializing, default)]
    pub login_access_token: String,
    /// Unix seconds at which the stored session stops being accepted
    #[serde(skip_serializing, default)]
    pub login_access_token_expires_in: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.account_type == ADMIN_ACCOUNT_TYPE
    }
}

/// API key pair, one row per account
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: i64,
    pub account_id: i64,
    pub public_key: String,
    pub private_key: String,
    pub is_live: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One-time passcode, at most one row per account
#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub id: i64,
    pub account_id: i64,
    pub otp_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Password reset token; several may be outstanding for one account
#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub id: i64,
    pub account_id: i64,
    pub token: String,
    /// Unix seconds
    pub expires_at: i64,
    pub created_at: DateTime<Utc>,
}

/// Device/session challenge history
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuthorizeAttempt {
    pub id: i64,
    pub account_id: i64,
    pub authorized: bool,
    pub token: String,
    pub ip_address: String,
    pub browser: String,
    pub os: String,
    pub location: String,
    pub attempt: i64,
    pub authorized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Presence of a row bans the account
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BannedAccount {
    pub id: i64,
    pub account_id: i64,
    pub created_at: DateTime<Utc>,
}
