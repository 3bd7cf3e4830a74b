//! The refresh endpoint: silent access-token renewal and grace rotation.
//!
//! Two-stage verification of the presented refresh token:
//!
//! 1. Strict (signature + expiry). On success the session record is checked
//!    and only a fresh access token is minted. No rotation, no cookie change.
//! 2. Fallback for tokens that failed strict verification, typically because
//!    they expired in flight: lossy-decode the claimed session uuid and, if
//!    the durable record still matches the token hash and sits within the
//!    grace buffer, rotate the whole session and set a fresh cookie.
//!
//! Every terminal failure collapses to one wire response: cookie cleared,
//! `session_expired`. The client logs out on it without inspecting further.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;

use super::{
    login::with_refresh_cookie,
    session::{self, SessionTokens},
    state::AuthState,
    storage::{self, RefreshTokenRecord},
    tokens::{unix_now, Claims, TokenKind, TokenSigner},
    types::SessionBody,
    utils::{self, DeviceContext},
};
use crate::api::error::{trace, ApiError, ApiReply};

enum RefreshFailure {
    /// Session unrecoverable. The context string names the actual cause for
    /// the log; the wire only ever sees `session_expired`.
    Fatal(&'static str),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for RefreshFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<ApiError> for RefreshFailure {
    fn from(err: ApiError) -> Self {
        Self::Internal(anyhow::anyhow!("{}: {}", err.context, err.message))
    }
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Fresh access token, possibly with a rotated refresh cookie"),
        (status = 403, description = "Session expired, cookie cleared, client must log out"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = session::refresh_cookie_value(&headers) else {
        return session_expired(&state, "No refresh cookie on request");
    };

    let outcome = match state.signer().verify(TokenKind::Refresh, &token) {
        Ok(claims) => silent_refresh(&pool, &claims, &token, &state).await,
        Err(_) => {
            let device = utils::device_context(&headers);
            rotate_within_grace(&pool, &state, &token, &device).await
        }
    };

    match outcome {
        Ok(response) => response,
        Err(RefreshFailure::Fatal(context)) => session_expired(&state, context),
        Err(RefreshFailure::Internal(err)) => ApiError::from(err).into_response(),
    }
}

/// Per-record verdict on a presented refresh token. Pure: both refresh paths
/// run this against the looked-up record before touching anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordCheck {
    Usable,
    /// No record under the claimed session uuid: revoked by logout, deleted
    /// by account removal, or already rotated away.
    Missing,
    /// Cryptographically plausible token that is not what was last issued
    /// for this session: a replay from before an intervening rotation.
    HashMismatch,
    /// Record outlived even the grace buffer; only a full login helps.
    PastGrace,
}

fn check_record(
    record: Option<&RefreshTokenRecord>,
    presented_token: &str,
    now: i64,
) -> RecordCheck {
    let Some(record) = record else {
        return RecordCheck::Missing;
    };
    if record.token_hash != utils::hash_refresh_token(presented_token) {
        return RecordCheck::HashMismatch;
    }
    if now > record.expires_at {
        return RecordCheck::PastGrace;
    }
    RecordCheck::Usable
}

/// Common case: the refresh token is still valid, so the record stays put
/// and only the short-lived access token is re-minted.
async fn silent_refresh(
    pool: &PgPool,
    claims: &Claims,
    presented_token: &str,
    state: &AuthState,
) -> Result<Response, RefreshFailure> {
    if storage::lookup_account(pool, claims.sub).await?.is_none() {
        return Err(RefreshFailure::Fatal("Refresh token for missing account"));
    }

    let record = usable_record(pool, claims, presented_token).await?;

    let access_token = state
        .signer()
        .sign(TokenKind::Access, claims.sub, record.session_uuid)
        .map_err(|err| anyhow::anyhow!("failed to sign access token: {err}"))?;

    Ok(refresh_success(access_token))
}

/// Fallback: the token failed strict verification. Recover the claimed
/// session uuid, and if the durable record is still honored, rotate.
async fn rotate_within_grace(
    pool: &PgPool,
    state: &AuthState,
    presented_token: &str,
    device: &DeviceContext,
) -> Result<Response, RefreshFailure> {
    let Ok(claims) = TokenSigner::decode_lossy(presented_token) else {
        return Err(RefreshFailure::Fatal("Refresh token not decodable"));
    };

    if storage::lookup_account(pool, claims.sub).await?.is_none() {
        return Err(RefreshFailure::Fatal("Refresh token for missing account"));
    }

    let record = usable_record(pool, &claims, presented_token).await?;

    // Single-winner step: of two concurrent rotations for this uuid, only
    // one gets the row back. The loser is told the session expired.
    let Some(claimed) = storage::claim_refresh_record(pool, record.session_uuid).await? else {
        return Err(RefreshFailure::Fatal("Session record claimed concurrently"));
    };

    let tokens = session::renew_session(
        pool,
        state,
        claimed.account_id,
        claimed.last_login_at,
        false,
        device,
    )
    .await?;

    rotated_success(state, &tokens)
}

/// Look up the record behind the claims and run [`check_record`] on it. A
/// failed check leaves the live record untouched, except past-grace records
/// which are claimed away so they do not linger.
async fn usable_record(
    pool: &PgPool,
    claims: &Claims,
    presented_token: &str,
) -> Result<RefreshTokenRecord, RefreshFailure> {
    let record = storage::lookup_refresh_record(pool, claims.sid).await?;
    match (check_record(record.as_ref(), presented_token, unix_now()), record) {
        (RecordCheck::Usable, Some(record)) => Ok(record),
        (RecordCheck::HashMismatch, _) => Err(RefreshFailure::Fatal(
            "Refresh token does not match stored hash",
        )),
        (RecordCheck::PastGrace, _) => {
            storage::claim_refresh_record(pool, claims.sid).await?;
            Err(RefreshFailure::Fatal("Session record past grace buffer"))
        }
        _ => Err(RefreshFailure::Fatal("No session record for refresh token")),
    }
}

fn refresh_success(access_token: String) -> Response {
    ApiReply::new(StatusCode::OK, "Session refreshed.", "refresh/success")
        .with_data(SessionBody {
            access_token,
            user: None,
        })
        .into_response()
}

fn rotated_success(state: &AuthState, tokens: &SessionTokens) -> Result<Response, RefreshFailure> {
    let response = refresh_success(tokens.access_token.clone());
    Ok(with_refresh_cookie(
        response,
        &session::refresh_cookie(state, &tokens.refresh_token),
    )?)
}

fn session_expired(state: &AuthState, context: &'static str) -> Response {
    let error = ApiError::session_invalid(StatusCode::FORBIDDEN, context, trace::SESSION_EXPIRED);
    let response = error.into_response();
    with_refresh_cookie(response, &session::clear_refresh_cookie(state))
        .unwrap_or_else(IntoResponse::into_response)
}
