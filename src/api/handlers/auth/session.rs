//! Session lifecycle: minting token pairs, rotation and the refresh cookie.

use anyhow::{anyhow, Result};
use axum::http::{header::COOKIE, HeaderMap};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    state::AuthState,
    storage::{self, RefreshTokenRecord},
    tokens::{unix_now, TokenKind, TokenSigner},
    utils::{hash_refresh_token, DeviceContext},
};

pub(crate) const REFRESH_COOKIE_NAME: &str = "refreshToken";
const REFRESH_COOKIE_PATH: &str = "/auth/refresh";

/// A freshly minted token pair. Both tokens embed the same session uuid.
#[derive(Debug, Clone)]
pub(crate) struct SessionTokens {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
}

/// Create a brand-new session for an account.
///
/// The record is persisted before any token leaves this function: a pair the
/// client holds always has a durable counterpart, or it was never issued.
pub(crate) async fn init_session(
    pool: &PgPool,
    state: &AuthState,
    account_id: Uuid,
    device: &DeviceContext,
) -> Result<SessionTokens> {
    mint_and_persist(pool, state, account_id, device, unix_now()).await
}

/// Rotate a session: a fresh uuid and pair replace the claimed record.
///
/// `last_login_at` carries over from the old record unless the rotation is a
/// password-verified step-up, which counts as a new login.
pub(crate) async fn renew_session(
    pool: &PgPool,
    state: &AuthState,
    account_id: Uuid,
    previous_last_login_at: i64,
    update_last_login: bool,
    device: &DeviceContext,
) -> Result<SessionTokens> {
    let last_login_at = if update_last_login {
        unix_now()
    } else {
        previous_last_login_at
    };
    mint_and_persist(pool, state, account_id, device, last_login_at).await
}

async fn mint_and_persist(
    pool: &PgPool,
    state: &AuthState,
    account_id: Uuid,
    device: &DeviceContext,
    last_login_at: i64,
) -> Result<SessionTokens> {
    let session_uuid = TokenSigner::mint_session_uuid();
    let access_token = state
        .signer()
        .sign(TokenKind::Access, account_id, session_uuid)
        .map_err(|err| anyhow!("failed to sign access token: {err}"))?;
    let refresh_token = state
        .signer()
        .sign(TokenKind::Refresh, account_id, session_uuid)
        .map_err(|err| anyhow!("failed to sign refresh token: {err}"))?;

    // Record outlives the signed expiry by the grace buffer.
    let ttl = state.config().refresh_token_ttl() + state.config().refresh_grace();
    let record = RefreshTokenRecord {
        session_uuid,
        account_id,
        token_hash: hash_refresh_token(&refresh_token),
        last_login_at,
        expires_at: unix_now() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
    };
    storage::insert_refresh_record(pool, &record, device).await?;

    Ok(SessionTokens {
        access_token,
        refresh_token,
    })
}

/// Set-Cookie value binding the refresh token to its single endpoint.
///
/// `SameSite=None` because the frontend runs on a different origin; `Secure`
/// is dropped only when explicitly configured for plain-HTTP development.
/// The cookie must outlive the signed token by the grace buffer, same as the
/// DB record: a token that expires in flight can only reach the rotation
/// fallback if the browser still sends it.
pub(crate) fn refresh_cookie(state: &AuthState, refresh_token: &str) -> String {
    let max_age =
        (state.config().refresh_token_ttl() + state.config().refresh_grace()).as_secs();
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={refresh_token}; Path={REFRESH_COOKIE_PATH}; \
         Max-Age={max_age}; HttpOnly; SameSite=None"
    );
    if state.config().secure_cookies() {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Expired Set-Cookie value clearing the refresh token on the client.
pub(crate) fn clear_refresh_cookie(state: &AuthState) -> String {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}=; Path={REFRESH_COOKIE_PATH}; Max-Age=0; HttpOnly; SameSite=None"
    );
    if state.config().secure_cookies() {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Extract the refresh token from the request's Cookie header, if present.
pub(crate) fn refresh_cookie_value(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name.trim() == REFRESH_COOKIE_NAME).then(|| value.trim().to_string())
        })
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::{test_config, AuthConfig};
    use axum::http::HeaderValue;
    use secrecy::SecretString;

    fn state() -> AuthState {
        AuthState::new(test_config())
    }

    fn insecure_state() -> AuthState {
        AuthState::new(AuthConfig::new(
            SecretString::from("access-secret"),
            SecretString::from("refresh-secret"),
            15,
            10,
            1,
            10,
            "http://localhost:5173".to_string(),
            false,
        ))
    }

    #[test]
    fn refresh_cookie_scoped_to_refresh_path() {
        let cookie = refresh_cookie(&state(), "tok");
        assert!(cookie.starts_with("refreshToken=tok;"));
        assert!(cookie.contains("Path=/auth/refresh"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=None"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn refresh_cookie_survives_the_grace_window() {
        // A browser drops the cookie at Max-Age. If that happens before the
        // DB record's grace-extended expiry, the rotation fallback can never
        // fire; the cookie must live exactly as long as the record does.
        let state = state();
        let cookie = refresh_cookie(&state, "tok");

        let max_age: u64 = cookie
            .split("; ")
            .find_map(|attr| attr.strip_prefix("Max-Age="))
            .and_then(|value| value.parse().ok())
            .expect("cookie should carry Max-Age");
        let record_lifetime =
            (state.config().refresh_token_ttl() + state.config().refresh_grace()).as_secs();
        assert_eq!(max_age, record_lifetime);
    }

    #[test]
    fn insecure_config_drops_secure_attribute() {
        let cookie = refresh_cookie(&insecure_state(), "tok");
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_refresh_cookie(&state());
        assert!(cookie.starts_with("refreshToken=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn cookie_value_extracted_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; refreshToken=abc.def.ghi; lang=en"),
        );
        assert_eq!(
            refresh_cookie_value(&headers),
            Some("abc.def.ghi".to_string())
        );
    }

    #[test]
    fn cookie_value_absent_when_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(refresh_cookie_value(&headers), None);
        assert_eq!(refresh_cookie_value(&HeaderMap::new()), None);
    }

    #[test]
    fn empty_cookie_value_treated_as_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("refreshToken="));
        assert_eq!(refresh_cookie_value(&headers), None);
    }
}
