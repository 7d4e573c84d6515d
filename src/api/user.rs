/// Endpoints for a signed-in user, all behind the session guard
use crate::{
    account::{Identity, UpdatePasswordRequest},
    api::{done, success, ApiResponse, ValidJson},
    auth::{authorize, Guard, Strategy},
    context::AppContext,
    db::models::AccessToken,
    error::ApiResult,
    tier::TierRestrictions,
};
use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    Router::new()
        .route("/v2/send_otp", post(send_otp))
        .route("/v2/validate-token", post(validate_token))
        .route("/v2/logout", post(logout))
        .route("/v2/user/restrictions", get(restrictions))
        .route("/v2/user/upgrade_tier", post(upgrade_tier))
        .route("/v2/user/security/update_password", post(update_password))
        .route("/v2/user/security/get_access_token", get(get_access_token))
        .route("/v2/revoke-token", post(revoke_token))
        .route_layer(middleware::from_fn_with_state(
            Guard::new(ctx.clone(), &[Strategy::Session]),
            authorize,
        ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpgradeTierRequest {
    #[serde(default)]
    #[validate(range(min = 1, max = 2, message = "tier must be 1 or 2"))]
    pub tier: i64,
}

async fn send_otp(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> ApiResult<Json<ApiResponse<()>>> {
    ctx.otp.issue(identity.account_id).await?;
    Ok(done("OTP Generated"))
}

async fn validate_token() -> Json<ApiResponse<()>> {
    done("token valid")
}

async fn logout(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> ApiResult<Json<ApiResponse<()>>> {
    ctx.account_manager.logout(identity.account_id).await?;
    Ok(done("logout successful"))
}

async fn restrictions(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> ApiResult<Json<ApiResponse<TierRestrictions>>> {
    let restrictions = ctx.tiers.evaluate(identity.account_id).await?;
    Ok(success("success", restrictions))
}

async fn upgrade_tier(
    State(ctx): State<AppContext>,
    identity: Identity,
    ValidJson(req): ValidJson<UpgradeTierRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    ctx.tiers.upgrade(identity.account_id, req.tier).await?;
    Ok(done("Upgraded"))
}

async fn update_password(
    State(ctx): State<AppContext>,
    identity: Identity,
    ValidJson(req): ValidJson<UpdatePasswordRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    ctx.account_manager
        .update_password(identity.account_id, &req.old_password, &req.new_password)
        .await?;
    Ok(done("Password Updated"))
}

async fn get_access_token(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> ApiResult<Json<ApiResponse<AccessToken>>> {
    let token = ctx.api_keys.issue(identity.account_id).await?;
    Ok(success("success", token))
}

async fn revoke_token(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> ApiResult<Json<ApiResponse<()>>> {
    ctx.api_keys.revoke(identity.account_id).await?;
    Ok(done("Business access token has been revoked"))
}
