/// Account management
///
/// Looks up users, runs password and session lifecycles, and records
/// authorization attempts.

mod attempts;
mod manager;

pub use attempts::AuthorizeAttemptManager;
pub use manager::{AccountManager, SessionRejection};

use crate::db::models::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Password login request; at least one identifier must be supplied
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

/// Session issued by password login or OTP validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token_type: String,
    pub access_token: String,
    pub expires_in: DateTime<Utc>,
    pub login_count: i64,
    pub user: User,
}

/// Where a request came from, recorded on successful logins
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

/// Password change for an authenticated user
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "old_password is required"))]
    pub old_password: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "new_password is required"))]
    pub new_password: String,
}

/// Identity published to handlers by the session and admin strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: i64,
    pub account_type: String,
}

/// Lookup of an authorization attempt by id, or by account and context
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct GetAuthorizeRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub account_id: i64,
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub browser: String,
}

/// Record an authorization attempt for an account and device context
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateAuthorizeRequest {
    #[serde(default)]
    #[validate(range(min = 1, message = "account_id is required"))]
    pub account_id: i64,
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub location: String,
}

/// Partial update of an authorization attempt; empty fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateAuthorizeRequest {
    #[serde(default)]
    #[validate(range(min = 1, message = "id is required"))]
    pub id: i64,
    #[serde(default)]
    pub account_id: i64,
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub attempt: i64,
}
