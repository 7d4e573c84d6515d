/// Configuration management for the auth service
use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub credentials: CredentialConfig,
    pub collaborators: CollaboratorConfig,
    pub email: Option<EmailConfig>,
    pub rate_limit: RateLimitConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Namespace embedded in generated API keys (`v_<app_name>_...`)
    pub app_name: String,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database: PathBuf,
    pub max_connections: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Session token lifetime in hours
    pub access_token_ttl_hours: i64,
    /// Static application key presented in `v-app`
    pub app_key: String,
}

/// One-time credential lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub otp_ttl_minutes: i64,
    pub reset_token_ttl_minutes: i64,
}

/// External collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    pub notification_url: Option<String>,
    pub verification_url: Option<String>,
    pub timeout_secs: u64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Rate limiting configuration for credential endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub credential_requests_per_minute: u32,
    /// Key on `x-forwarded-for` / `x-real-ip` instead of the peer address.
    /// Only safe behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ApiResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("AUTH_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("AUTH_PORT")
            .unwrap_or_else(|_| "8019".to_string())
            .parse()
            .map_err(|_| ApiError::Internal("Invalid port number".to_string()))?;
        let app_name = env::var("AUTH_APP_NAME").unwrap_or_else(|_| "auth".to_string());
        let version = env::var("AUTH_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let database = env::var("AUTH_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/auth.sqlite"));
        let max_connections = env::var("AUTH_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let jwt_secret = env::var("AUTH_JWT_SECRET")
            .map_err(|_| ApiError::Internal("JWT secret required".to_string()))?;
        let access_token_ttl_hours = env::var("AUTH_ACCESS_TOKEN_TTL_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);
        let app_key = env::var("AUTH_APP_KEY")
            .map_err(|_| ApiError::Internal("Application key required".to_string()))?;

        let otp_ttl_minutes = env::var("AUTH_OTP_TTL_MINUTES")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        let reset_token_ttl_minutes = env::var("AUTH_RESET_TOKEN_TTL_MINUTES")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let notification_url = env::var("AUTH_NOTIFICATION_URL").ok();
        let verification_url = env::var("AUTH_VERIFICATION_URL").ok();
        let timeout_secs = env::var("AUTH_OUTBOUND_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let email = if let Ok(smtp_url) = env::var("AUTH_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("AUTH_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let rate_limit_enabled = env::var("AUTH_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let credential_requests_per_minute = env::var("AUTH_CREDENTIAL_REQUESTS_PER_MINUTE")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        let trust_proxy_headers = env::var("AUTH_TRUST_PROXY_HEADERS")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                app_name,
                version,
            },
            storage: StorageConfig {
                database,
                max_connections,
            },
            authentication: AuthConfig {
                jwt_secret,
                access_token_ttl_hours,
                app_key,
            },
            credentials: CredentialConfig {
                otp_ttl_minutes,
                reset_token_ttl_minutes,
            },
            collaborators: CollaboratorConfig {
                notification_url,
                verification_url,
                timeout_secs,
            },
            email,
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                credential_requests_per_minute,
                trust_proxy_headers,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ApiError::Internal("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(ApiError::Internal(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.app_key.is_empty() {
            return Err(ApiError::Internal("Application key cannot be empty".to_string()));
        }

        if self.authentication.access_token_ttl_hours <= 0 {
            return Err(ApiError::Internal(
                "Access token lifetime must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
