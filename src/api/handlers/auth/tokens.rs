//! Token issuer: signed access and refresh tokens sharing a session uuid.
//!
//! Both tokens of a session embed the same `sid`; the sid is the join key to
//! the persisted refresh-token record. An access token is only meaningful
//! while a record with its sid is alive.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use super::state::AuthConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id.
    pub sub: Uuid,
    /// Session uuid, minted fresh on every rotation.
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid,
        }
    }
}

/// Seconds since the epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}

/// HS256 signer holding one key pair per token kind.
pub struct TokenSigner {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenSigner {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let access_secret = config.access_token_secret().expose_secret().as_bytes();
        let refresh_secret = config.refresh_token_secret().expose_secret().as_bytes();
        Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
        }
    }

    /// Session uuids are v7: time-ordered and unique per rotation.
    #[must_use]
    pub fn mint_session_uuid() -> Uuid {
        Uuid::now_v7()
    }

    pub fn sign(
        &self,
        kind: TokenKind,
        account_id: Uuid,
        session_uuid: Uuid,
    ) -> Result<String, TokenError> {
        self.sign_at(kind, account_id, session_uuid, unix_now())
    }

    pub(crate) fn sign_at(
        &self,
        kind: TokenKind,
        account_id: Uuid,
        session_uuid: Uuid,
        now: i64,
    ) -> Result<String, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: account_id,
            sid: session_uuid,
            iat: now,
            exp: now + i64::try_from(ttl.as_secs()).map_err(|_| TokenError::Invalid)?,
        };
        let key = match kind {
            TokenKind::Access => &self.access_encoding,
            TokenKind::Refresh => &self.refresh_encoding,
        };
        encode(&Header::new(Algorithm::HS256), &claims, key).map_err(TokenError::from)
    }

    /// Strict verification: signature and expiry, with the kind's own secret.
    pub fn verify(&self, kind: TokenKind, token: &str) -> Result<Claims, TokenError> {
        let key = match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };
        let data = decode::<Claims>(token, key, &Validation::new(Algorithm::HS256))?;
        Ok(data.claims)
    }

    /// Lossy decode: signature and expiry ignored.
    ///
    /// Only two callers are allowed near this: the refresh fallback path,
    /// which recovers the claimed sid from a token that failed strict
    /// verification, and nothing else. Authenticated paths reuse the claims
    /// the auth guard already verified instead of re-decoding.
    pub fn decode_lossy(token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::test_config;

    fn signer() -> TokenSigner {
        TokenSigner::new(&test_config())
    }

    #[test]
    fn session_uuids_are_unique_per_mint() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(TokenSigner::mint_session_uuid()));
        }
    }

    #[test]
    fn sign_and_verify_round_trip() -> Result<(), TokenError> {
        let signer = signer();
        let account_id = Uuid::new_v4();
        let sid = TokenSigner::mint_session_uuid();

        let token = signer.sign(TokenKind::Access, account_id, sid)?;
        let claims = signer.verify(TokenKind::Access, &token)?;
        assert_eq!(claims.sub, account_id);
        assert_eq!(claims.sid, sid);
        Ok(())
    }

    #[test]
    fn kinds_use_distinct_secrets() -> Result<(), TokenError> {
        let signer = signer();
        let token = signer.sign(TokenKind::Refresh, Uuid::new_v4(), Uuid::new_v4())?;
        assert!(matches!(
            signer.verify(TokenKind::Access, &token),
            Err(TokenError::Invalid)
        ));
        Ok(())
    }

    #[test]
    fn expired_token_fails_strict_verification() -> Result<(), TokenError> {
        let signer = signer();
        let account_id = Uuid::new_v4();
        let sid = Uuid::new_v4();
        // Issued far enough in the past that even the refresh ttl has elapsed.
        let long_ago = unix_now() - 60 * 60 * 24 * 365;
        let token = signer.sign_at(TokenKind::Refresh, account_id, sid, long_ago)?;

        assert!(matches!(
            signer.verify(TokenKind::Refresh, &token),
            Err(TokenError::Expired)
        ));
        Ok(())
    }

    #[test]
    fn lossy_decode_recovers_claims_from_expired_token() -> Result<(), TokenError> {
        let signer = signer();
        let account_id = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let long_ago = unix_now() - 60 * 60 * 24 * 365;
        let token = signer.sign_at(TokenKind::Refresh, account_id, sid, long_ago)?;

        let claims = TokenSigner::decode_lossy(&token)?;
        assert_eq!(claims.sub, account_id);
        assert_eq!(claims.sid, sid);
        Ok(())
    }

    #[test]
    fn lossy_decode_rejects_garbage() {
        assert!(matches!(
            TokenSigner::decode_lossy("not-a-token"),
            Err(TokenError::Invalid)
        ));
    }
}
