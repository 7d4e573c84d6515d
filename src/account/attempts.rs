/// Authorization attempt history
///
/// Device/session challenges raised by other services. A repeated attempt
/// from the same account and context bumps the counter on the existing row.

use crate::{
    account::{CreateAuthorizeRequest, GetAuthorizeRequest, UpdateAuthorizeRequest},
    db::models::AuthorizeAttempt,
    error::{ApiError, ApiResult},
};
use chrono::Utc;
use sqlx::SqlitePool;

pub struct AuthorizeAttemptManager {
    db: SqlitePool,
}

impl AuthorizeAttemptManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Fetch by id, or by account with the authorized flag and optional context
    pub async fn get(&self, req: &GetAuthorizeRequest) -> ApiResult<AuthorizeAttempt> {
        if req.id == 0 && req.account_id == 0 {
            return Err(ApiError::bad_request("enter either account_id or id"));
        }

        let attempt = if req.id != 0 {
            self.find_by_id(req.id).await?
        } else {
            sqlx::query_as::<_, AuthorizeAttempt>(
                "SELECT * FROM authorizes
                 WHERE account_id = ?1
                   AND authorized = ?2
                   AND (?3 = '' OR ip_address = ?3)
                   AND (?4 = '' OR browser = ?4)
                 ORDER BY id
                 LIMIT 1",
            )
            .bind(req.account_id)
            .bind(req.authorized)
            .bind(&req.ip_address)
            .bind(&req.browser)
            .fetch_optional(&self.db)
            .await?
        };

        attempt.ok_or_else(|| ApiError::bad_request("authorize record not found"))
    }

    /// Insert a new attempt, or increment the matching one.
    ///
    /// Once authorized a row stays authorized; `authorized_at` moves only
    /// when this call authorizes.
    pub async fn record(&self, req: &CreateAuthorizeRequest) -> ApiResult<AuthorizeAttempt> {
        if req.account_id == 0 {
            return Err(ApiError::bad_request("account_id is required"));
        }

        let now = Utc::now();
        let authorized_at = req.authorized.then_some(now);

        let existing = sqlx::query_as::<_, AuthorizeAttempt>(
            "SELECT * FROM authorizes
             WHERE account_id = ?1
               AND (?2 = '' OR ip_address = ?2)
               AND (?3 = '' OR browser = ?3)
             ORDER BY id
             LIMIT 1",
        )
        .bind(req.account_id)
        .bind(&req.ip_address)
        .bind(&req.browser)
        .fetch_optional(&self.db)
        .await?;

        let id = match existing {
            Some(attempt) => {
                sqlx::query(
                    "UPDATE authorizes
                     SET authorized = ?1, token = ?2, ip_address = ?3, browser = ?4, os = ?5,
                         location = ?6, attempt = attempt + 1,
                         authorized_at = COALESCE(?7, authorized_at), updated_at = ?8
                     WHERE id = ?9",
                )
                .bind(attempt.authorized || req.authorized)
                .bind(&req.token)
                .bind(&req.ip_address)
                .bind(&req.browser)
                .bind(&req.os)
                .bind(&req.location)
                .bind(authorized_at)
                .bind(now)
                .bind(attempt.id)
                .execute(&self.db)
                .await?;

                attempt.id
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO authorizes
                        (account_id, authorized, token, ip_address, browser, os, location,
                         attempt, authorized_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?9)",
                )
                .bind(req.account_id)
                .bind(req.authorized)
                .bind(&req.token)
                .bind(&req.ip_address)
                .bind(&req.browser)
                .bind(&req.os)
                .bind(&req.location)
                .bind(authorized_at)
                .bind(now)
                .execute(&self.db)
                .await?;

                result.last_insert_rowid()
            }
        };

        self.find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::Internal(format!("authorize record {} vanished", id)))
    }

    /// Overwrite the supplied fields of an attempt
    pub async fn update(&self, req: &UpdateAuthorizeRequest) -> ApiResult<AuthorizeAttempt> {
        let mut attempt = self
            .find_by_id(req.id)
            .await?
            .ok_or_else(|| ApiError::bad_request("authorize record not found"))?;

        if req.account_id != 0 {
            attempt.account_id = req.account_id;
        }
        for (field, value) in [
            (&mut attempt.token, &req.token),
            (&mut attempt.ip_address, &req.ip_address),
            (&mut attempt.browser, &req.browser),
            (&mut attempt.os, &req.os),
            (&mut attempt.location, &req.location),
        ] {
            if !value.is_empty() {
                *field = value.clone();
            }
        }
        if req.attempt != 0 {
            attempt.attempt = req.attempt;
        }
        attempt.authorized = attempt.authorized || req.authorized;
        if req.authorized {
            attempt.authorized_at = Some(Utc::now());
        }
        attempt.updated_at = Utc::now();

        sqlx::query(
            "UPDATE authorizes
             SET account_id = ?1, authorized = ?2, token = ?3, ip_address = ?4, browser = ?5,
                 os = ?6, location = ?7, attempt = ?8, authorized_at = ?9, updated_at = ?10
             WHERE id = ?11",
        )
        .bind(attempt.account_id)
        .bind(attempt.authorized)
        .bind(&attempt.token)
        .bind(&attempt.ip_address)
        .bind(&attempt.browser)
        .bind(&attempt.os)
        .bind(&attempt.location)
        .bind(attempt.attempt)
        .bind(attempt.authorized_at)
        .bind(attempt.updated_at)
        .bind(attempt.id)
        .execute(&self.db)
        .await?;

        Ok(attempt)
    }

    async fn find_by_id(&self, id: i64) -> ApiResult<Option<AuthorizeAttempt>> {
        let attempt = sqlx::query_as::<_, AuthorizeAttempt>("SELECT * FROM authorizes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(attempt)
    }
}
