//! Request authorization.
//!
//! Each guarded route carries an ordered list of [`Strategy`]s. The first
//! strategy that accepts the request admits it; when all of them refuse,
//! the request is rejected with the last strategy's message and every
//! failure listed in the error detail.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{
    account::{Identity, SessionRejection},
    context::AppContext,
    credentials::KeyRejection,
    db::models::AccessToken,
    error::ApiError,
    metrics,
};

const INVALID_CREDENTIALS: &str = "Your request was made with invalid credentials.";

const PUBLIC_KEY_HEADER: &str = "v-public-key";
const PRIVATE_KEY_HEADER: &str = "v-private-key";
const APP_KEY_HEADER: &str = "v-app";

/// A way a request may prove who it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Bearer session token, checked against the stored session
    Session,
    /// Live API key pair
    ApiKey,
    /// Static application key
    AppKey,
    /// Live API key pair presented by a business integration
    Business,
    /// Live API key pair owned by an admin account
    BusinessAdmin,
}

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Strategy::Session => "session",
            Strategy::ApiKey => "api_key",
            Strategy::AppKey => "app_key",
            Strategy::Business => "business",
            Strategy::BusinessAdmin => "business_admin",
        }
    }
}

/// What admitted the request; stored in the request extensions
#[derive(Debug, Clone)]
pub enum Admission {
    Session(Identity),
    ApiKey(AccessToken),
    AppKey,
    Business(AccessToken),
    BusinessAdmin(Identity),
}

impl Admission {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Admission::Session(identity) | Admission::BusinessAdmin(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Failure {
    strategy: Strategy,
    message: String,
    /// Store failure rather than a credential problem
    internal: bool,
}

impl Failure {
    fn denied(strategy: Strategy, message: impl Into<String>) -> Self {
        Self {
            strategy,
            message: message.into(),
            internal: false,
        }
    }

    fn internal(strategy: Strategy, message: impl Into<String>) -> Self {
        Self {
            strategy,
            message: message.into(),
            internal: true,
        }
    }
}

/// Strategy set for one group of routes
#[derive(Clone)]
pub struct Guard {
    ctx: AppContext,
    strategies: Arc<[Strategy]>,
}

impl Guard {
    pub fn new(ctx: AppContext, strategies: &[Strategy]) -> Self {
        Self {
            ctx,
            strategies: strategies.into(),
        }
    }

    /// Run the strategies in order until one admits
    pub async fn evaluate(&self, headers: &HeaderMap) -> Result<Admission, ApiError> {
        let mut failures: Vec<Failure> = Vec::with_capacity(self.strategies.len());

        for &strategy in self.strategies.iter() {
            match self.check(strategy, headers).await {
                Ok(admission) => {
                    metrics::record_authorization(strategy.label(), true);
                    tracing::debug!("Request admitted by {} strategy", strategy.label());
                    return Ok(admission);
                }
                Err(failure) => {
                    metrics::record_authorization(strategy.label(), false);
                    tracing::debug!(
                        "{} strategy refused request: {}",
                        strategy.label(),
                        failure.message
                    );
                    failures.push(failure);
                }
            }
        }

        let details = failures
            .iter()
            .map(|f| format!("{}: {}", f.strategy.label(), f.message))
            .collect();

        match failures.pop() {
            Some(last) if last.internal => Err(ApiError::Internal(format!(
                "{} strategy failed: {}",
                last.strategy.label(),
                last.message
            ))),
            Some(last) => Err(ApiError::Unauthorized {
                message: last.message,
                details,
            }),
            None => Err(ApiError::Internal(
                "route guard has no strategies".to_string(),
            )),
        }
    }

    async fn check(&self, strategy: Strategy, headers: &HeaderMap) -> Result<Admission, Failure> {
        match strategy {
            Strategy::Session => self.check_session(headers).await.map(Admission::Session),
            Strategy::ApiKey => self.check_keys(strategy, headers).await.map(Admission::ApiKey),
            Strategy::Business => self
                .check_keys(strategy, headers)
                .await
                .map(Admission::Business),
            Strategy::AppKey => self.check_app_key(headers).map(|_| Admission::AppKey),
            Strategy::BusinessAdmin => self
                .check_business_admin(headers)
                .await
                .map(Admission::BusinessAdmin),
        }
    }

    async fn check_session(&self, headers: &HeaderMap) -> Result<Identity, Failure> {
        let header = header_value(headers, "authorization");
        if header.is_empty() {
            return Err(Failure::denied(Strategy::Session, "token not provided"));
        }

        let token = bearer_token(header).ok_or_else(|| {
            tracing::debug!("Authorization header is not a bearer token");
            Failure::denied(Strategy::Session, INVALID_CREDENTIALS)
        })?;

        match self.ctx.account_manager.authenticate(token).await {
            Ok(identity) => Ok(identity),
            Err(SessionRejection::Store(e)) => {
                Err(Failure::internal(Strategy::Session, e.to_string()))
            }
            Err(reason) => {
                tracing::debug!("Session rejected: {}", reason);
                Err(Failure::denied(Strategy::Session, INVALID_CREDENTIALS))
            }
        }
    }

    async fn check_keys(
        &self,
        strategy: Strategy,
        headers: &HeaderMap,
    ) -> Result<AccessToken, Failure> {
        let public_key = header_value(headers, PUBLIC_KEY_HEADER);
        let private_key = header_value(headers, PRIVATE_KEY_HEADER);

        match self.ctx.api_keys.validate(public_key, private_key).await {
            Ok(token) => Ok(token),
            Err(KeyRejection::Store(e)) => {
                tracing::error!("API key lookup failed: {}", e);
                Err(Failure::internal(strategy, "server error"))
            }
            Err(rejection) => Err(Failure::denied(strategy, rejection.to_string())),
        }
    }

    fn check_app_key(&self, headers: &HeaderMap) -> Result<(), Failure> {
        let presented = header_value(headers, APP_KEY_HEADER);
        if presented.is_empty() {
            return Err(Failure::denied(Strategy::AppKey, "missing app key"));
        }

        let expected = self.ctx.config.authentication.app_key.as_bytes();
        if bool::from(presented.as_bytes().ct_eq(expected)) {
            Ok(())
        } else {
            Err(Failure::denied(Strategy::AppKey, "invalid app key"))
        }
    }

    async fn check_business_admin(&self, headers: &HeaderMap) -> Result<Identity, Failure> {
        let token = self.check_keys(Strategy::BusinessAdmin, headers).await?;

        match self.ctx.account_manager.find_user(token.account_id).await {
            Ok(Some(user)) if user.is_admin() => Ok(Identity {
                account_id: user.account_id,
                account_type: user.account_type,
            }),
            Ok(_) => Err(Failure::denied(Strategy::BusinessAdmin, "access denied")),
            Err(e) => {
                tracing::error!("Admin lookup failed: {}", e);
                Err(Failure::internal(Strategy::BusinessAdmin, "server error"))
            }
        }
    }
}

/// Header value or empty; names are matched case-insensitively
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
}

/// Token from `Bearer <token>`; the scheme is case-insensitive
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token)
}

/// Authorization middleware; attach with `from_fn_with_state(guard, authorize)`
pub async fn authorize(
    State(guard): State<Guard>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let admission = guard.evaluate(req.headers()).await?;

    if let Some(identity) = admission.identity() {
        req.extensions_mut().insert(identity.clone());
    }
    req.extensions_mut().insert(admission);

    Ok(next.run(req).await)
}
