/// Application context and dependency injection
use crate::{
    account::{AccountManager, AuthorizeAttemptManager},
    auth::token::SessionTokenCodec,
    config::ServerConfig,
    credentials::{ApiKeyManager, OtpService, PasswordResetFlow},
    db,
    error::ApiResult,
    mailer::Mailer,
    notify::{FanoutNotifier, NotificationClient, Notifier},
    rate_limit::RateLimiter,
    tier::TierEvaluator,
    verification::{VerificationClient, VerificationSource},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub api_keys: Arc<ApiKeyManager>,
    pub otp: Arc<OtpService>,
    pub password_reset: Arc<PasswordResetFlow>,
    pub tiers: Arc<TierEvaluator>,
    pub attempts: Arc<AuthorizeAttemptManager>,
    // Credential endpoint limiter
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ApiResult<Self> {
        config.validate()?;

        let options = db::DatabaseOptions {
            max_connections: config.storage.max_connections,
            ..Default::default()
        };
        let pool = db::create_pool(&config.storage.database, options).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        // Outbound calls authenticate with the service's own key pair
        let api_keys = Arc::new(ApiKeyManager::new(
            pool.clone(),
            config.service.app_name.clone(),
        ));

        let mut targets: Vec<Arc<dyn Notifier>> = Vec::new();
        match NotificationClient::from_config(&config.collaborators, api_keys.clone())? {
            Some(client) => targets.push(Arc::new(client)),
            None => tracing::info!("Notification service not configured"),
        }
        let mailer = Mailer::new(config.email.clone())?;
        if mailer.is_configured() {
            targets.push(Arc::new(mailer));
        }
        let notifier = Arc::new(FanoutNotifier::new(targets));

        let verifications = Arc::new(VerificationClient::new(
            &config.collaborators,
            api_keys.clone(),
        )?);

        Ok(Self::from_parts(config, pool, api_keys, notifier, verifications))
    }

    /// Wire the services around an existing pool and collaborators
    pub fn from_parts(
        config: ServerConfig,
        pool: SqlitePool,
        api_keys: Arc<ApiKeyManager>,
        notifier: Arc<dyn Notifier>,
        verifications: Arc<dyn VerificationSource>,
    ) -> Self {
        let codec = SessionTokenCodec::from_config(&config.authentication);
        let account_manager = Arc::new(AccountManager::new(pool.clone(), codec));

        let otp = Arc::new(OtpService::new(
            pool.clone(),
            account_manager.clone(),
            notifier.clone(),
            chrono::Duration::minutes(config.credentials.otp_ttl_minutes),
        ));
        let password_reset = Arc::new(PasswordResetFlow::new(
            pool.clone(),
            account_manager.clone(),
            notifier,
            chrono::Duration::minutes(config.credentials.reset_token_ttl_minutes),
        ));
        let tiers = Arc::new(TierEvaluator::new(account_manager.clone(), verifications));
        let attempts = Arc::new(AuthorizeAttemptManager::new(pool.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Self {
            config: Arc::new(config),
            db: pool,
            account_manager,
            api_keys,
            otp,
            password_reset,
            tiers,
            attempts,
            rate_limiter,
        }
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{insert_user, test_config, NewUser};

    #[tokio::test]
    async fn test_new_context_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.storage.database = dir.path().join("auth.sqlite");

        let ctx = AppContext::new(config).await.unwrap();
        insert_user(&ctx.db, NewUser::new(12)).await;

        let keys = ctx.api_keys.issue(12).await.unwrap();
        assert!(keys.public_key.starts_with("v_auth_"));
        assert_eq!(ctx.service_url(), "http://127.0.0.1:8019");
    }
}
