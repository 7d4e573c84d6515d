/// Account auth service
///
/// Session tokens, API key pairs, one-time passcodes, password reset and
/// tier restrictions for a multi-tenant account platform.

mod account;
mod api;
mod auth;
mod config;
mod context;
mod credentials;
mod db;
mod error;
mod mailer;
mod metrics;
mod notify;
mod rate_limit;
mod server;
mod tier;
mod verification;

#[cfg(test)]
mod test_utils;

use config::ServerConfig;
use context::AppContext;
use error::ApiResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ApiResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        "Starting {} v{}",
        config.service.app_name,
        config.service.version
    );

    let ctx = AppContext::new(config).await?;

    server::serve(ctx).await?;

    Ok(())
}
