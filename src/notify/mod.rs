/// Outbound notifications
///
/// Credential flows hand codes and tokens to a [`Notifier`]. Delivery is
/// best effort: failures are logged by the caller and never fail the flow.

use crate::{
    config::CollaboratorConfig,
    credentials::ApiKeyManager,
    db::models::User,
    error::{ApiError, ApiResult},
};
use async_trait::async_trait;
use serde::Serialize;
use std::{sync::Arc, time::Duration};

/// Delivery channel for reset notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    fn path_segment(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "phone",
        }
    }
}

/// Who a notification is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub account_id: i64,
    pub email: String,
    pub phone: String,
    pub name: String,
}

impl From<&User> for Recipient {
    fn from(user: &User) -> Self {
        Self {
            account_id: user.account_id,
            email: user.email_address.clone(),
            phone: user.phone_number.clone(),
            name: user.firstname.clone(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_otp(&self, recipient: &Recipient, code: &str) -> ApiResult<()>;

    async fn send_password_reset(
        &self,
        recipient: &Recipient,
        channel: Channel,
        token: &str,
    ) -> ApiResult<()>;

    async fn send_password_changed(&self, recipient: &Recipient, channel: Channel)
        -> ApiResult<()>;
}

/// Sends every notification to each configured target
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        if targets.is_empty() {
            tracing::warn!("No notification targets configured; codes will not be delivered");
        }
        Self { targets }
    }
}

/// First failure wins, but every target is still attempted
fn first_error(results: Vec<ApiResult<()>>) -> ApiResult<()> {
    results.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn send_otp(&self, recipient: &Recipient, code: &str) -> ApiResult<()> {
        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            results.push(target.send_otp(recipient, code).await);
        }
        first_error(results)
    }

    async fn send_password_reset(
        &self,
        recipient: &Recipient,
        channel: Channel,
        token: &str,
    ) -> ApiResult<()> {
        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            results.push(target.send_password_reset(recipient, channel, token).await);
        }
        first_error(results)
    }

    async fn send_password_changed(
        &self,
        recipient: &Recipient,
        channel: Channel,
    ) -> ApiResult<()> {
        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            results.push(target.send_password_changed(recipient, channel).await);
        }
        first_error(results)
    }
}

#[derive(Serialize)]
struct OtpPayload {
    account_id: i64,
    otp_token: i64,
}

#[derive(Serialize)]
struct TokenPayload {
    account_id: i64,
    token: i64,
}

#[derive(Serialize)]
struct AccountPayload {
    account_id: i64,
}

/// Client for the notification service.
///
/// Requests carry the service's own live API key pair.
pub struct NotificationClient {
    http: reqwest::Client,
    base_url: String,
    api_keys: Arc<ApiKeyManager>,
}

impl NotificationClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        api_keys: Arc<ApiKeyManager>,
    ) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_keys,
        })
    }

    pub fn from_config(
        config: &CollaboratorConfig,
        api_keys: Arc<ApiKeyManager>,
    ) -> ApiResult<Option<Self>> {
        match &config.notification_url {
            Some(url) => Ok(Some(Self::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
                api_keys,
            )?)),
            None => Ok(None),
        }
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> ApiResult<()> {
        let keys = self.api_keys.service_credentials().await?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .header("v-public-key", &keys.public_key)
            .header("v-private-key", &keys.private_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("POST {} failed: {}", path, e)))?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "POST {} returned {}",
                path,
                response.status()
            )));
        }

        tracing::debug!("Notification {} accepted", path);
        Ok(())
    }
}

fn numeric(code: &str) -> ApiResult<i64> {
    code.parse()
        .map_err(|_| ApiError::Internal("credential code is not numeric".to_string()))
}

#[async_trait]
impl Notifier for NotificationClient {
    async fn send_otp(&self, recipient: &Recipient, code: &str) -> ApiResult<()> {
        let body = OtpPayload {
            account_id: recipient.account_id,
            otp_token: numeric(code)?,
        };
        self.post("/send_otp", &body).await
    }

    async fn send_password_reset(
        &self,
        recipient: &Recipient,
        channel: Channel,
        token: &str,
    ) -> ApiResult<()> {
        let body = TokenPayload {
            account_id: recipient.account_id,
            token: numeric(token)?,
        };
        let path = format!("/{}/send/reset_password", channel.path_segment());
        self.post(&path, &body).await
    }

    async fn send_password_changed(
        &self,
        recipient: &Recipient,
        channel: Channel,
    ) -> ApiResult<()> {
        let body = AccountPayload {
            account_id: recipient.account_id,
        };
        let path = format!("/{}/send/reset_password/done", channel.path_segment());
        self.post(&path, &body).await
    }
}
