//! Reauth-gated account mutations: password, email, deletion.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use crate::api::error::{trace, ApiError, ApiReply};
use crate::api::handlers::auth::{
    login::with_refresh_cookie,
    principal::{require_auth, require_recent_auth},
    session,
    state::AuthState,
    storage::{self, EmailChangeOutcome},
    utils,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordPayload {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmailPayload {
    pub email: String,
}

#[utoipa::path(
    patch,
    path = "/user/password",
    responses(
        (status = 200, description = "Password updated"),
        (status = 403, description = "Password re-entry required"),
        (status = 409, description = "Validation failure or incorrect current password"),
    ),
    tag = "user",
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn change_password(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<ChangePasswordPayload>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &state).await?;
    require_recent_auth(&pool, &state, &principal).await?;

    let Some(Json(payload)) = payload else {
        return Err(ApiError::missing_payload());
    };
    if payload.current_password.is_empty() || !utils::valid_password(&payload.new_password) {
        return Err(ApiError::validation(
            "Passwords must be between 8 and 128 characters.",
            trace::PASSWORD_VALIDATION,
        ));
    }

    let Some(account) =
        storage::lookup_account_with_credentials(&pool, principal.account.id).await?
    else {
        return Err(ApiError::session_invalid(
            StatusCode::CONFLICT,
            "Account vanished mid-request",
            trace::AUTH_NO_USER,
        ));
    };

    if !utils::verify_password(&payload.current_password, &account.password_hash) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "Current password is incorrect.",
            "Current-password check failed on change",
            trace::PASSWORD_INCORRECT_CURRENT,
        ));
    }

    let password_hash = utils::hash_password(&payload.new_password)
        .map_err(|err| ApiError::from(anyhow::anyhow!("failed to hash password: {err}")))?;
    storage::update_password(&pool, account.id, &password_hash).await?;

    Ok(
        ApiReply::<()>::new(StatusCode::OK, "Password updated.", "password/success")
            .into_response(),
    )
}

#[utoipa::path(
    patch,
    path = "/user/email",
    responses(
        (status = 200, description = "Email updated"),
        (status = 403, description = "Password re-entry required"),
        (status = 409, description = "Validation failure or email already registered"),
    ),
    tag = "user",
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn change_email(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<ChangeEmailPayload>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &state).await?;
    require_recent_auth(&pool, &state, &principal).await?;

    let Some(Json(payload)) = payload else {
        return Err(ApiError::missing_payload());
    };
    let email = utils::normalize_email(&payload.email);
    if !utils::valid_email(&email) {
        return Err(ApiError::validation(
            "Please provide a valid email address.",
            trace::EMAIL_VALIDATION,
        ));
    }

    match storage::update_email(&pool, principal.account.id, &email).await? {
        EmailChangeOutcome::Updated => Ok(ApiReply::<()>::new(
            StatusCode::OK,
            "Email updated.",
            "email/success",
        )
        .into_response()),
        EmailChangeOutcome::EmailExists => Err(ApiError::validation(
            "An account with this email already exists.",
            trace::EMAIL_EXISTS,
        )),
    }
}

#[utoipa::path(
    delete,
    path = "/user/account",
    responses(
        (status = 200, description = "Account deleted, cookie cleared"),
        (status = 403, description = "Password re-entry required"),
    ),
    tag = "user",
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn delete_account(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &state).await?;
    require_recent_auth(&pool, &state, &principal).await?;

    // Cascades to every refresh record, revoking all of the account's
    // sessions at once.
    storage::delete_account(&pool, principal.account.id).await?;

    let response = ApiReply::<()>::new(StatusCode::OK, "Account deleted.", "account/success")
        .into_response();
    with_refresh_cookie(response, &session::clear_refresh_cookie(&state))
}
