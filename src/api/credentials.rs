/// Unauthenticated credential endpoints: login, OTP and password reset.
///
/// All of them sit behind the per-client rate limiter.
use crate::{
    account::{ClientInfo, LoginRequest, LoginResponse},
    api::{done, success, ApiResponse, ValidJson},
    context::AppContext,
    credentials::NumericCode,
    error::ApiResult,
    rate_limit::rate_limit_middleware,
};
use axum::{extract::State, middleware, routing::post, Json, Router};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use validator::Validate;

pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    Router::new()
        .route("/v2/login", post(login))
        .route("/v2/login-phone", post(login_phone))
        .route("/v2/otp/send_otp", post(send_otp))
        .route("/v2/is_otp_valid", post(validate_otp))
        .route("/v2/reset-password", post(request_password_reset))
        .route("/v2/reset-password/change-password", post(change_password))
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            rate_limit_middleware,
        ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PhoneLoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "phone_number is required"))]
    pub phone_number: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendOtpRequest {
    #[serde(default)]
    #[validate(range(min = 1, message = "account_id is required"))]
    pub account_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateOtpRequest {
    #[serde(default)]
    #[validate(range(min = 1, message = "account_id is required"))]
    pub account_id: i64,
    #[serde(default)]
    pub otp_token: NumericCode,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(email(message = "email_address is not a valid email"))]
    pub email_address: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub phone_number: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    #[validate(range(min = 1, message = "account_id is required"))]
    pub account_id: i64,
    #[serde(default)]
    pub token: NumericCode,
    #[serde(default)]
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

/// Password login; a phone login also gets a code for the second factor
async fn login(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    ValidJson(req): ValidJson<LoginRequest>,
) -> ApiResult<Json<ApiResponse<LoginResponse>>> {
    let response = ctx.account_manager.login(&req, &client).await?;

    // The session is already stored, so a failed code must not fail the login
    if !req.phone_number.is_empty() {
        if let Err(e) = ctx.otp.issue(response.user.account_id).await {
            tracing::warn!(
                "Login OTP not issued for account {}: {}",
                response.user.account_id,
                e
            );
        }
    }

    Ok(success("login successful", response))
}

async fn login_phone(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<PhoneLoginRequest>,
) -> ApiResult<Json<ApiResponse<Value>>> {
    let account_id = ctx.otp.login_by_phone(&req.phone_number).await?;
    Ok(success("login successful", json!({ "account_id": account_id })))
}

/// Also mounted behind the API key guard for service callers
pub(crate) async fn send_otp(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<SendOtpRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    ctx.otp.issue(req.account_id).await?;
    Ok(done("OTP Generated"))
}

async fn validate_otp(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    ValidJson(req): ValidJson<ValidateOtpRequest>,
) -> ApiResult<Json<ApiResponse<LoginResponse>>> {
    let response = ctx
        .otp
        .validate(req.account_id, &req.otp_token.as_code(), &client)
        .await?;
    Ok(success("login successful", response))
}

async fn request_password_reset(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<PasswordResetRequest>,
) -> ApiResult<Json<ApiResponse<Value>>> {
    let account_id = ctx
        .password_reset
        .request(
            req.email_address.as_deref().unwrap_or_default(),
            req.phone_number.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(success("Request Sent", json!({ "account_id": account_id })))
}

async fn change_password(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<ChangePasswordRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    ctx.password_reset
        .confirm(req.account_id, &req.token.as_code(), &req.password)
        .await?;
    Ok(done("Password Updated"))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::test_support::{call, json_body, json_request},
        server::build_router,
        test_utils::{insert_user, test_config, test_context, test_context_with, NewUser},
    };
    use axum::{extract::ConnectInfo, http::StatusCode};
    use serde_json::json;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn test_login_then_validate_token() {
        let (ctx, notifier) = test_context().await;
        insert_user(&ctx.db, NewUser::new(7).password("hunter22")).await;
        let app = build_router(ctx);

        let req = json_request("POST", "/v2/login")
            .body(json_body(json!({"username": "user7", "password": "hunter22"})))
            .unwrap();
        let (status, body) = call(&app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "login successful");
        assert_eq!(body["data"]["token_type"], "auth");
        assert_eq!(body["data"]["login_count"], 1);
        assert_eq!(body["data"]["user"]["account_id"], 7);
        assert!(body["data"]["user"].get("password").is_none());
        assert!(notifier.otps().is_empty());

        let token = body["data"]["access_token"].as_str().unwrap();
        let req = json_request("POST", "/v2/validate-token")
            .header("authorization", format!("Bearer {}", token))
            .body(json_body(json!({})))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "token valid");
    }

    #[tokio::test]
    async fn test_login_with_phone_sends_code() {
        let (ctx, notifier) = test_context().await;
        insert_user(&ctx.db, NewUser::new(7).password("hunter22")).await;
        let app = build_router(ctx);

        let req = json_request("POST", "/v2/login")
            .body(json_body(
                json!({"phone_number": "+2340000007", "password": "hunter22"}),
            ))
            .unwrap();
        let (status, _) = call(&app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(notifier.otps().len(), 1);
    }

    #[tokio::test]
    async fn test_login_with_phone_survives_otp_store_failure() {
        let (ctx, notifier) = test_context().await;
        insert_user(&ctx.db, NewUser::new(7).password("hunter22")).await;
        sqlx::query("DROP TABLE otp_verification")
            .execute(&ctx.db)
            .await
            .unwrap();
        let app = build_router(ctx);

        let req = json_request("POST", "/v2/login")
            .body(json_body(
                json!({"phone_number": "+2340000007", "password": "hunter22"}),
            ))
            .unwrap();
        let (status, body) = call(&app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["access_token"].is_string());
        assert!(notifier.otps().is_empty());

        let token = body["data"]["access_token"].as_str().unwrap();
        let req = json_request("POST", "/v2/validate-token")
            .header("authorization", format!("Bearer {}", token))
            .body(json_body(json!({})))
            .unwrap();
        let (status, _) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_is_still_limited() {
        let mut config = test_config();
        config.rate_limit.enabled = true;
        config.rate_limit.credential_requests_per_minute = 2;
        let (ctx, _) = test_context_with(config).await;
        insert_user(&ctx.db, NewUser::new(7).password("hunter22")).await;
        let app = build_router(ctx);
        let peer: SocketAddr = "198.51.100.7:50000".parse().unwrap();

        let mut statuses = Vec::new();
        for i in 0..5 {
            let req = json_request("POST", "/v2/login")
                .header("x-forwarded-for", format!("203.0.113.{}", i))
                .extension(ConnectInfo(peer))
                .body(json_body(json!({"username": "user7", "password": "wrong"})))
                .unwrap();
            let (status, _) = call(&app, req).await;
            statuses.push(status);
        }

        assert_eq!(&statuses[..2], &[StatusCode::BAD_REQUEST; 2]);
        assert!(statuses[2..]
            .iter()
            .all(|status| *status == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_trusted_proxy_limits_per_forwarded_client() {
        let mut config = test_config();
        config.rate_limit.enabled = true;
        config.rate_limit.credential_requests_per_minute = 1;
        config.rate_limit.trust_proxy_headers = true;
        let (ctx, _) = test_context_with(config).await;
        let app = build_router(ctx);
        let proxy: SocketAddr = "10.0.0.2:50000".parse().unwrap();

        let attempt = |client: &str| {
            json_request("POST", "/v2/login")
                .header("x-forwarded-for", client)
                .extension(ConnectInfo(proxy))
                .body(json_body(json!({"username": "nobody", "password": "x"})))
                .unwrap()
        };

        let (status, _) = call(&app, attempt("203.0.113.1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, attempt("203.0.113.1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let (status, _) = call(&app, attempt("203.0.113.2")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_failures() {
        let (ctx, _) = test_context().await;
        insert_user(&ctx.db, NewUser::new(7).password("hunter22")).await;
        let app = build_router(ctx);

        let req = json_request("POST", "/v2/login")
            .body(json_body(json!({"username": "user7", "password": "wrong"})))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "invalid login details");

        let req = json_request("POST", "/v2/login")
            .body(json_body(json!({"password": "hunter22"})))
            .unwrap();
        let (_, body) = call(&app, req).await;
        assert_eq!(
            body["message"],
            "provide either username, email_address, or phone_number"
        );

        let req = json_request("POST", "/v2/login")
            .body(json_body(json!({"username": "user7"})))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Validation failed");
    }

    #[tokio::test]
    async fn test_phone_login_and_otp_validation() {
        let (ctx, notifier) = test_context().await;
        insert_user(&ctx.db, NewUser::new(9)).await;
        let app = build_router(ctx);

        let req = json_request("POST", "/v2/login-phone")
            .body(json_body(json!({"phone_number": "+2340000009"})))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["account_id"], 9);

        let code: u64 = notifier.otps()[0].1.parse().unwrap();
        let req = json_request("POST", "/v2/is_otp_valid")
            .body(json_body(json!({"account_id": 9, "otp_token": code})))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["account_id"], 9);

        let req = json_request("POST", "/v2/is_otp_valid")
            .body(json_body(
                json!({"account_id": 9, "otp_token": code.to_string()}),
            ))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "invalid otp");
    }

    #[tokio::test]
    async fn test_password_reset_round_trip() {
        let (ctx, notifier) = test_context().await;
        insert_user(&ctx.db, NewUser::new(21).password("before")).await;
        let app = build_router(ctx);

        let req = json_request("POST", "/v2/reset-password")
            .body(json_body(
                json!({"email_address": "user21@example.com", "phone_number": ""}),
            ))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Request Sent");
        assert_eq!(body["data"]["account_id"], 21);

        let token: u64 = notifier.resets()[0].2.parse().unwrap();
        let req = json_request("POST", "/v2/reset-password/change-password")
            .body(json_body(
                json!({"account_id": 21, "token": token, "password": "after"}),
            ))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Password Updated");

        let req = json_request("POST", "/v2/login")
            .body(json_body(
                json!({"email_address": "user21@example.com", "password": "after"}),
            ))
            .unwrap();
        let (status, _) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reset_rejects_malformed_email() {
        let (ctx, _) = test_context().await;
        let app = build_router(ctx);

        let req = json_request("POST", "/v2/reset-password")
            .body(json_body(json!({"email_address": "not-an-email"})))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Validation failed");
    }
}
