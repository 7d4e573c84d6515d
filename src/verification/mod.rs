/// Identity verification records held by the verification service
use crate::{
    config::CollaboratorConfig,
    credentials::ApiKeyManager,
    error::{ApiError, ApiResult},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

/// One verification record (national_id, bvn, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub verification_type: Option<String>,
    #[serde(default)]
    pub is_verified: Option<bool>,
    #[serde(default)]
    pub verified_at: Option<String>,
}

impl Verification {
    pub fn is_verified_as(&self, kind: &str) -> bool {
        self.is_verified.unwrap_or(false) && self.verification_type.as_deref() == Some(kind)
    }
}

#[async_trait]
pub trait VerificationSource: Send + Sync {
    async fn verifications(&self, account_id: i64) -> ApiResult<Vec<Verification>>;
}

#[derive(Deserialize)]
struct VerificationsEnvelope {
    #[serde(default)]
    data: Vec<Verification>,
}

#[derive(Serialize)]
struct AccountPayload {
    account_id: i64,
}

/// Client for the verification service; unconfigured returns no records
pub struct VerificationClient {
    http: reqwest::Client,
    base_url: Option<String>,
    api_keys: Arc<ApiKeyManager>,
}

impl VerificationClient {
    pub fn new(config: &CollaboratorConfig, api_keys: Arc<ApiKeyManager>) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config
                .verification_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            api_keys,
        })
    }
}

#[async_trait]
impl VerificationSource for VerificationClient {
    async fn verifications(&self, account_id: i64) -> ApiResult<Vec<Verification>> {
        let Some(base_url) = &self.base_url else {
            return Ok(Vec::new());
        };

        let keys = self.api_keys.service_credentials().await?;

        let response = self
            .http
            .post(format!("{}/fetch", base_url))
            .header("v-public-key", &keys.public_key)
            .header("v-private-key", &keys.private_key)
            .json(&AccountPayload { account_id })
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("verification fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "verification fetch returned {}",
                response.status()
            )));
        }

        let envelope: VerificationsEnvelope = response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("verification response invalid: {}", e)))?;

        Ok(envelope.data)
    }
}
