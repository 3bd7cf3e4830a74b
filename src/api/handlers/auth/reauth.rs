//! Step-up re-verification and logout.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;

use super::{
    login::with_refresh_cookie,
    principal::require_auth,
    session,
    state::AuthState,
    storage,
    types::{ReauthPayload, SessionBody},
    utils,
};
use crate::api::error::{trace, ApiError, ApiReply};

#[utoipa::path(
    post,
    path = "/auth/reauth",
    responses(
        (status = 200, description = "Password verified, session rotated with a reset freshness clock"),
        (status = 409, description = "Incorrect password"),
    ),
    tag = "auth",
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn reauth(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<ReauthPayload>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &state).await?;

    let Some(Json(payload)) = payload else {
        return Err(ApiError::missing_payload());
    };
    if payload.password.is_empty() {
        return Err(ApiError::validation(
            "Please enter your password.",
            trace::REAUTH_VALIDATION,
        ));
    }

    let Some(account) =
        storage::lookup_account_with_credentials(&pool, principal.account.id).await?
    else {
        return Err(ApiError::session_invalid(
            StatusCode::CONFLICT,
            "Account vanished between guard and reauth",
            trace::AUTH_NO_USER,
        ));
    };

    if !utils::verify_password(&payload.password, &account.password_hash) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "Incorrect password.",
            "Password re-verification failed",
            trace::REAUTH_INCORRECT_PASSWORD,
        ));
    }

    // Claim the old record first so the rotation replaces it instead of
    // leaving two live records for one device.
    let Some(old) = storage::claim_refresh_record(&pool, principal.claims.sid).await? else {
        return Err(ApiError::session_invalid(
            StatusCode::UNAUTHORIZED,
            "No session record behind a verified access token",
            trace::NO_SESSION_RECORD,
        ));
    };

    let device = utils::device_context(&headers);
    let tokens = session::renew_session(
        &pool,
        &state,
        old.account_id,
        old.last_login_at,
        true,
        &device,
    )
    .await?;

    let response = ApiReply::new(StatusCode::OK, "Identity confirmed.", "reauth/success")
        .with_data(SessionBody {
            access_token: tokens.access_token.clone(),
            user: None,
        })
        .into_response();
    with_refresh_cookie(response, &session::refresh_cookie(&state, &tokens.refresh_token))
}

#[utoipa::path(
    delete,
    path = "/auth/logout",
    responses((status = 200, description = "Session record removed, cookie cleared")),
    tag = "auth",
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn logout(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &state).await?;

    // Removes exactly this device's session; other sessions stay live.
    storage::delete_refresh_record(&pool, principal.claims.sid).await?;

    let response = ApiReply::<()>::new(StatusCode::OK, "Logged out.", "logout/success").into_response();
    with_refresh_cookie(response, &session::clear_refresh_cookie(&state))
}
