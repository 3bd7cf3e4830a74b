//! Shared auth configuration and state.

use secrecy::SecretString;
use std::time::Duration;

use super::tokens::TokenSigner;

/// Token lifetimes, freshness buffers and cookie policy.
///
/// The refresh grace buffer is extra time past the signed refresh-token
/// lifetime during which the DB record is still honored, so a token that
/// expired in flight can rotate instead of forcing a re-login.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    access_token_secret: SecretString,
    refresh_token_secret: SecretString,
    access_token_ttl_minutes: u64,
    refresh_token_ttl_days: u64,
    refresh_grace_days: u64,
    reauth_buffer_minutes: u64,
    frontend_url: String,
    secure_cookies: bool,
}

impl AuthConfig {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        access_token_secret: SecretString,
        refresh_token_secret: SecretString,
        access_token_ttl_minutes: u64,
        refresh_token_ttl_days: u64,
        refresh_grace_days: u64,
        reauth_buffer_minutes: u64,
        frontend_url: String,
        secure_cookies: bool,
    ) -> Self {
        Self {
            access_token_secret,
            refresh_token_secret,
            access_token_ttl_minutes,
            refresh_token_ttl_days,
            refresh_grace_days,
            reauth_buffer_minutes,
            frontend_url,
            secure_cookies,
        }
    }

    pub(crate) fn access_token_secret(&self) -> &SecretString {
        &self.access_token_secret
    }

    pub(crate) fn refresh_token_secret(&self) -> &SecretString {
        &self.refresh_token_secret
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_minutes * 60)
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_days * 24 * 60 * 60)
    }

    #[must_use]
    pub fn refresh_grace(&self) -> Duration {
        Duration::from_secs(self.refresh_grace_days * 24 * 60 * 60)
    }

    #[must_use]
    pub fn reauth_buffer(&self) -> Duration {
        Duration::from_secs(self.reauth_buffer_minutes * 60)
    }

    #[must_use]
    pub fn reauth_buffer_minutes(&self) -> u64 {
        self.reauth_buffer_minutes
    }

    #[must_use]
    pub fn frontend_url(&self) -> &str {
        &self.frontend_url
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}

/// Config plus the token signer derived from it, shared via `Extension`.
pub struct AuthState {
    config: AuthConfig,
    signer: TokenSigner,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let signer = TokenSigner::new(&config);
        Self { config, signer }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AuthConfig {
    AuthConfig::new(
        SecretString::from("access-secret"),
        SecretString::from("refresh-secret"),
        15,
        10,
        1,
        10,
        "http://localhost:5173".to_string(),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_derive_from_units() {
        let config = test_config();
        assert_eq!(config.access_token_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(config.refresh_token_ttl(), Duration::from_secs(10 * 86400));
        assert_eq!(config.refresh_grace(), Duration::from_secs(86400));
        assert_eq!(config.reauth_buffer(), Duration::from_secs(600));
    }
}
