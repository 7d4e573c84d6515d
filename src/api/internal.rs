/// Service-to-service endpoints, guarded by API, app or admin keys
use crate::{
    account::{CreateAuthorizeRequest, GetAuthorizeRequest, UpdateAuthorizeRequest},
    api::{credentials, success, ApiResponse, ValidJson},
    auth::{authorize, Admission, Guard, Strategy},
    context::AppContext,
    db::models::{AccessToken, AuthorizeAttempt, User},
    error::ApiResult,
};
use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    let guarded = |router: Router<AppContext>, strategies: &[Strategy]| {
        router.route_layer(middleware::from_fn_with_state(
            Guard::new(ctx.clone(), strategies),
            authorize,
        ))
    };

    let admin = Router::new().route("/v2/users/get", get(get_users));

    let api_key = Router::new().route("/v2/api/send_otp", post(credentials::send_otp));

    let app_key = Router::new()
        .route("/v2/get_authorize", post(get_authorize))
        .route("/v2/create_authorize", post(create_authorize))
        .route("/v2/update_authorize", post(update_authorize))
        .route(
            "/v2/get_access_token_by_key/:key",
            get(get_access_token_by_key),
        );

    Router::new()
        .merge(guarded(admin, &[Strategy::BusinessAdmin, Strategy::AppKey]))
        .merge(guarded(api_key, &[Strategy::ApiKey]))
        .merge(guarded(app_key, &[Strategy::AppKey]))
}

#[derive(Debug, Default, Deserialize)]
pub struct UserSearch {
    #[serde(default)]
    pub search: String,
}

async fn get_users(
    State(ctx): State<AppContext>,
    Extension(admission): Extension<Admission>,
    Query(params): Query<UserSearch>,
) -> ApiResult<Json<ApiResponse<Vec<User>>>> {
    if let Some(identity) = admission.identity() {
        tracing::debug!("User search by admin account {}", identity.account_id);
    }

    let users = ctx.account_manager.search_users(&params.search).await?;
    Ok(success("Users retrieved", users))
}

async fn get_authorize(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<GetAuthorizeRequest>,
) -> ApiResult<Json<ApiResponse<AuthorizeAttempt>>> {
    let attempt = ctx.attempts.get(&req).await?;
    Ok(success("successful", attempt))
}

async fn create_authorize(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<CreateAuthorizeRequest>,
) -> ApiResult<Json<ApiResponse<AuthorizeAttempt>>> {
    let attempt = ctx.attempts.record(&req).await?;
    Ok(success("successful", attempt))
}

async fn update_authorize(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<UpdateAuthorizeRequest>,
) -> ApiResult<Json<ApiResponse<AuthorizeAttempt>>> {
    let attempt = ctx.attempts.update(&req).await?;
    Ok(success("successful", attempt))
}

async fn get_access_token_by_key(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
) -> ApiResult<Json<ApiResponse<AccessToken>>> {
    let token = ctx.api_keys.find_by_key(&key).await?;
    Ok(success("successful", token))
}
