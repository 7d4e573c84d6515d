/// Authentication extractors and utilities
pub mod dispatcher;
pub mod password;
pub mod token;

pub use dispatcher::{authorize, Admission, Guard, Strategy};

use crate::{account::Identity, error::ApiError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Identity published by the Session or BusinessAdmin strategy.
///
/// Only usable on routes whose guard can produce one; anywhere else the
/// request is rejected.
#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Your request was made with invalid credentials."))
    }
}
