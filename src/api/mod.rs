/// API routes and handlers
pub mod credentials;
pub mod internal;
pub mod user;

use crate::{
    account::ClientInfo, context::AppContext, error::ApiError, rate_limit::forwarded_ip,
};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, StatusCode},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr};
use validator::Validate;

/// Build API routes
pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    Router::new()
        .merge(credentials::routes(ctx))
        .merge(user::routes(ctx))
        .merge(internal::routes(ctx))
}

/// Success envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn success<T: Serialize>(message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        status: "success".to_string(),
        code: StatusCode::OK.as_u16(),
        message: message.to_string(),
        data: Some(data),
    })
}

/// Success without a payload
pub fn done(message: &str) -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        status: "success".to_string(),
        code: StatusCode::OK.as_u16(),
        message: message.to_string(),
        data: None,
    })
}

/// JSON body that has passed its field validation
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            tracing::debug!("Rejected request body: {}", e);
            ApiError::bad_request("Failed to parse request body")
        })?;

        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// Caller address and user agent, for login tracking
#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip_address = forwarded_ip(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|info| info.0.ip())
            })
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientInfo {
            ip_address,
            user_agent,
        })
    }
}
