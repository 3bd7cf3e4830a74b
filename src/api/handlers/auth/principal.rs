//! Request guards: bearer authentication and the step-up freshness gate.

use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use sqlx::PgPool;
use std::time::Duration;

use super::{
    state::AuthState,
    storage::{self, Account, RefreshTokenRecord},
    tokens::{unix_now, Claims, TokenKind},
};
use crate::api::error::{trace, ApiError};

/// An authenticated caller: the account row plus the claims the guard
/// verified. Handlers downstream trust these claims instead of re-decoding
/// the token.
#[derive(Debug, Clone)]
pub struct Principal {
    pub account: Account,
    pub claims: Claims,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authenticate a request from its Authorization header.
///
/// The three failures are distinct on the wire: a missing token (401) tells
/// the client it never attached one, an invalid token (403) is the one pair
/// the interceptor answers with refresh-and-retry, and a verified token for a
/// deleted account (409) is unrecoverable.
pub async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<Principal, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Err(ApiError::session_invalid(
            StatusCode::UNAUTHORIZED,
            "No access token in Authorization header",
            trace::NO_ACCESS_TOKEN,
        ));
    };

    let Ok(claims) = state.signer().verify(TokenKind::Access, token) else {
        return Err(ApiError::session_invalid(
            StatusCode::FORBIDDEN,
            "Access token failed verification",
            trace::INVALID_ACCESS_TOKEN,
        ));
    };

    let Some(account) = storage::lookup_account(pool, claims.sub).await? else {
        return Err(ApiError::session_invalid(
            StatusCode::CONFLICT,
            "Verified access token but account not found",
            trace::AUTH_NO_USER,
        ));
    };

    Ok(Principal { account, claims })
}

/// True while the session's last password entry is within the buffer.
pub(crate) fn reauth_fresh(last_login_at: i64, now: i64, buffer: Duration) -> bool {
    let elapsed = now.saturating_sub(last_login_at);
    elapsed <= i64::try_from(buffer.as_secs()).unwrap_or(i64::MAX)
}

/// Gate for sensitive operations: the caller's session must have seen a
/// password within the reauth buffer.
///
/// Returns the live refresh record so the handler that rotates afterwards
/// does not look it up twice.
pub(crate) async fn require_recent_auth(
    pool: &PgPool,
    state: &AuthState,
    principal: &Principal,
) -> Result<RefreshTokenRecord, ApiError> {
    let Some(record) = storage::lookup_refresh_record(pool, principal.claims.sid).await? else {
        return Err(ApiError::session_invalid(
            StatusCode::UNAUTHORIZED,
            "No session record behind a verified access token",
            trace::NO_SESSION_RECORD,
        ));
    };

    if !reauth_fresh(record.last_login_at, unix_now(), state.config().reauth_buffer()) {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Please re-enter your password to continue.",
            "Password re-entry window elapsed",
            trace::REAUTH_REQUIRED,
        ));
    }

    Ok(record)
}
