//! Registration, login and availability probes.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;

use super::{
    session,
    state::AuthState,
    storage::{self, SignupOutcome},
    types::{AccountBody, AvailabilityBody, AvailabilityQuery, LoginPayload, RegisterPayload, SessionBody},
    utils,
};
use crate::api::error::{trace, ApiError, ApiReply};

/// Attach the Set-Cookie header carrying the refresh token.
pub(crate) fn with_refresh_cookie(mut response: Response, cookie: &str) -> Result<Response, ApiError> {
    let value = axum::http::HeaderValue::from_str(cookie)
        .map_err(|err| ApiError::from(anyhow::Error::from(err)))?;
    response
        .headers_mut()
        .insert(axum::http::header::SET_COOKIE, value);
    Ok(response)
}

#[utoipa::path(
    post,
    path = "/auth/register",
    responses(
        (status = 201, description = "Account created and session established"),
        (status = 409, description = "Validation failure or email/username already registered"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<RegisterPayload>>,
) -> Result<Response, ApiError> {
    let Some(Json(payload)) = payload else {
        return Err(ApiError::missing_payload());
    };

    let email = utils::normalize_email(&payload.email);
    if !utils::valid_email(&email) {
        return Err(ApiError::validation(
            "Please provide a valid email address.",
            trace::REGISTER_VALIDATION,
        ));
    }
    if !utils::valid_username(&payload.username) {
        return Err(ApiError::validation(
            "Usernames are 3-20 lowercase letters, digits or underscores.",
            trace::REGISTER_VALIDATION,
        ));
    }
    if !utils::valid_password(&payload.password) {
        return Err(ApiError::validation(
            "Passwords must be between 8 and 128 characters.",
            trace::REGISTER_VALIDATION,
        ));
    }

    let password_hash = utils::hash_password(&payload.password)
        .map_err(|err| ApiError::from(anyhow::anyhow!("failed to hash password: {err}")))?;

    let outcome = storage::insert_account(&pool, &payload.username, &email, &password_hash).await?;
    let account = match outcome {
        SignupOutcome::Created(account) => account,
        SignupOutcome::EmailExists => {
            return Err(ApiError::validation(
                "An account with this email already exists.",
                trace::REGISTER_EMAIL_EXISTS,
            ));
        }
        SignupOutcome::UsernameExists => {
            return Err(ApiError::validation(
                "This username is already taken.",
                trace::REGISTER_USERNAME_EXISTS,
            ));
        }
    };

    // Registration logs the account straight in.
    let device = utils::device_context(&headers);
    let tokens = session::init_session(&pool, &state, account.id, &device).await?;

    let body = SessionBody {
        access_token: tokens.access_token.clone(),
        user: Some(AccountBody::from(account)),
    };
    let response = ApiReply::new(StatusCode::CREATED, "Account created.", "register/success")
        .with_data(body)
        .into_response();
    with_refresh_cookie(response, &session::refresh_cookie(&state, &tokens.refresh_token))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    responses(
        (status = 200, description = "Session established, refresh token set as cookie"),
        (status = 404, description = "No account under this email"),
        (status = 409, description = "Validation failure or incorrect credentials"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<LoginPayload>>,
) -> Result<Response, ApiError> {
    let Some(Json(payload)) = payload else {
        return Err(ApiError::missing_payload());
    };

    let email = utils::normalize_email(&payload.email);
    if !utils::valid_email(&email) || payload.password.is_empty() {
        return Err(ApiError::validation(
            "Please provide a valid email and password.",
            trace::LOGIN_VALIDATION,
        ));
    }

    let Some(account) = storage::lookup_account_by_email_with_credentials(&pool, &email).await?
    else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "No account found for this email.",
            "Login attempt for unknown email",
            trace::LOGIN_NO_USER,
        ));
    };

    if !utils::verify_password(&payload.password, &account.password_hash) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "Incorrect email or password.",
            "Password verification failed at login",
            trace::LOGIN_INCORRECT_CREDENTIALS,
        ));
    }

    let device = utils::device_context(&headers);
    let tokens = session::init_session(&pool, &state, account.id, &device).await?;

    let body = SessionBody {
        access_token: tokens.access_token.clone(),
        user: Some(AccountBody {
            id: account.id,
            username: account.username,
            email: account.email,
        }),
    };
    let response = ApiReply::new(StatusCode::OK, "Logged in.", "login/success")
        .with_data(body)
        .into_response();
    with_refresh_cookie(response, &session::refresh_cookie(&state, &tokens.refresh_token))
}

#[utoipa::path(
    get,
    path = "/auth/email-available",
    responses((status = 200, description = "Whether the email is free to register")),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn email_available(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Response, ApiError> {
    let email = utils::normalize_email(&query.value);
    if !utils::valid_email(&email) {
        return Err(ApiError::validation(
            "Please provide a valid email address.",
            trace::REGISTER_VALIDATION,
        ));
    }
    let taken = storage::email_taken(&pool, &email).await?;
    Ok(
        ApiReply::new(StatusCode::OK, "Availability checked.", "register/email_availability")
            .with_data(AvailabilityBody { available: !taken })
            .into_response(),
    )
}

#[utoipa::path(
    get,
    path = "/auth/username-available",
    responses((status = 200, description = "Whether the username is free to register")),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn username_available(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Response, ApiError> {
    if !utils::valid_username(&query.value) {
        return Err(ApiError::validation(
            "Usernames are 3-20 lowercase letters, digits or underscores.",
            trace::REGISTER_VALIDATION,
        ));
    }
    let taken = storage::username_taken(&pool, &query.value).await?;
    Ok(
        ApiReply::new(StatusCode::OK, "Availability checked.", "register/username_availability")
            .with_data(AvailabilityBody { available: !taken })
            .into_response(),
    )
}
