//! Rust client for the syncspace API.
//!
//! Call sites only ever see "succeeded" or "failed with message". The two
//! special failures are handled before business logic observes them: an
//! expired access token triggers a single shared refresh-and-retry, and a
//! step-up challenge parks the operation with the [`ReauthCoordinator`]
//! until the user re-enters their password.

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::api::error::trace;
use crate::APP_USER_AGENT;

pub mod interceptor;
pub mod reauth;
pub mod session;

use interceptor::{RefreshGate, Ticket};
pub use reauth::{PromptState, ReauthCoordinator, ResumeHandlers, RetryOp};
pub use session::{SessionState, SettingsState};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Classified API failure, surfaced to the call site as-is.
    #[error("{message}")]
    Api {
        code: u16,
        trace: String,
        message: String,
    },
    /// The session cannot be recovered. The caller is already logged out by
    /// the time it sees this.
    #[error("session expired, logged out")]
    SessionExpired,
    /// The server demands a password before this operation may proceed.
    #[error("re-authentication required")]
    ReauthRequired,
    #[error("invalid endpoint url: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    fn matches(&self, expected_code: u16, expected_trace: &str) -> bool {
        matches!(self, Self::Api { code, trace, .. }
            if *code == expected_code && trace == expected_trace)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: u16,
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    trace: String,
    #[serde(default)]
    data: Option<Value>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    pub session: SessionState,
    pub settings: SettingsState,
    gate: RefreshGate,
    pub reauth: ReauthCoordinator,
}

impl ApiClient {
    /// # Errors
    /// Fails when the base url is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        // The cookie store is where the refresh token lives; this code never
        // reads or writes it directly.
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            session: SessionState::default(),
            settings: SettingsState::default(),
            gate: RefreshGate::default(),
            reauth: ReauthCoordinator::default(),
        })
    }

    // ---- session lifecycle -------------------------------------------------

    /// # Errors
    /// Classified API failure or transport error.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Value, ClientError> {
        let data = self
            .request(
                Method::POST,
                "auth/register",
                Some(json!({
                    "username": username,
                    "email": email,
                    "password": password,
                })),
            )
            .await?;
        self.adopt_access_token(&data);
        Ok(data)
    }

    /// # Errors
    /// Classified API failure or transport error.
    pub async fn login(&self, email: &str, password: &str) -> Result<Value, ClientError> {
        let data = self
            .request(
                Method::POST,
                "auth/login",
                Some(json!({"email": email, "password": password})),
            )
            .await?;
        self.adopt_access_token(&data);
        Ok(data)
    }

    /// # Errors
    /// Classified API failure or transport error. Local state is cleared
    /// regardless of the outcome.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let outcome = self.request(Method::DELETE, "auth/logout", None).await;
        self.session.clear();
        outcome.map(|_| ())
    }

    /// # Errors
    /// Classified API failure or transport error.
    pub async fn fetch_session(&self) -> Result<Value, ClientError> {
        let data = self.request(Method::GET, "user/session", None).await?;
        if let Some(settings) = data.get("settings") {
            self.settings.confirm(settings.clone());
        }
        Ok(data)
    }

    /// # Errors
    /// Classified API failure or transport error.
    pub async fn email_available(&self, email: &str) -> Result<bool, ClientError> {
        let path = format!("auth/email-available?value={email}");
        let data = self.request(Method::GET, &path, None).await?;
        Ok(data["available"].as_bool().unwrap_or(false))
    }

    /// # Errors
    /// Classified API failure or transport error.
    pub async fn username_available(&self, username: &str) -> Result<bool, ClientError> {
        let path = format!("auth/username-available?value={username}");
        let data = self.request(Method::GET, &path, None).await?;
        Ok(data["available"].as_bool().unwrap_or(false))
    }

    // ---- settings ----------------------------------------------------------

    /// Optimistic settings update: the tentative value is visible via
    /// [`SettingsState::current`] immediately and rolled back on failure.
    ///
    /// # Errors
    /// Classified API failure or transport error.
    pub async fn update_settings(&self, settings: Value) -> Result<Value, ClientError> {
        self.settings.apply_tentative(settings.clone());
        match self
            .request(
                Method::PATCH,
                "user/settings",
                Some(json!({"settings": settings})),
            )
            .await
        {
            Ok(confirmed) => {
                self.settings.confirm(confirmed.clone());
                Ok(confirmed)
            }
            Err(err) => {
                self.settings.rollback();
                Err(err)
            }
        }
    }

    // ---- step-up operations ------------------------------------------------

    /// Issue a reauth-sensitive operation. On a step-up challenge the
    /// operation is parked, the password prompt opens, and the outcome is
    /// later delivered through `handlers`. Any other outcome is delivered
    /// immediately.
    pub async fn submit_sensitive(&self, op: RetryOp, handlers: ResumeHandlers) {
        match self.dispatch_retryable(op.clone()).await {
            Ok(data) => (handlers.on_success)(data),
            Err(ClientError::ReauthRequired) => {
                let callback_id = self.reauth.challenge(op, handlers);
                debug!("step-up required, prompt bound to {callback_id}");
            }
            Err(err) => (handlers.on_error)(err),
        }
    }

    /// Submit the password collected by the prompt.
    ///
    /// On success the parked operation is replayed with its original
    /// arguments and its outcome routed to the registered continuations; the
    /// prompt closes. On a wrong password the prompt stays open and the
    /// error is returned for inline display.
    ///
    /// # Errors
    /// Incorrect password or transport failure; the parked operation is
    /// untouched in both cases.
    pub async fn submit_reauth_password(&self, password: &str) -> Result<(), ClientError> {
        if !self.reauth.is_prompting() {
            return Ok(());
        }

        let data = self
            .request(Method::POST, "auth/reauth", Some(json!({"password": password})))
            .await?;
        self.adopt_access_token(&data);

        // Missing entry means a cancel raced us: nothing to resume.
        let Some(pending) = self.reauth.resolve() else {
            return Ok(());
        };
        match self.dispatch_retryable(pending.op).await {
            Ok(data) => (pending.handlers.on_success)(data),
            Err(err) => (pending.handlers.on_error)(err),
        }
        Ok(())
    }

    /// Replay table for the suspended operations.
    async fn dispatch_retryable(&self, op: RetryOp) -> Result<Value, ClientError> {
        match op {
            RetryOp::ChangePassword {
                current_password,
                new_password,
            } => {
                self.request(
                    Method::PATCH,
                    "user/password",
                    Some(json!({
                        "currentPassword": current_password,
                        "newPassword": new_password,
                    })),
                )
                .await
            }
            RetryOp::ChangeEmail { email } => {
                self.request(Method::PATCH, "user/email", Some(json!({"email": email})))
                    .await
            }
            RetryOp::DeleteAccount => {
                let data = self.request(Method::DELETE, "user/account", None).await?;
                self.session.clear();
                Ok(data)
            }
            RetryOp::CheckReauth => self.request(Method::GET, "user/reauth-status", None).await,
        }
    }

    // ---- request pipeline --------------------------------------------------

    /// Send a request, transparently refreshing the access token and
    /// retrying once when the server reports it invalid.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ClientError> {
        match self.send(method.clone(), path, body.clone()).await {
            Err(err) if err.matches(403, trace::INVALID_ACCESS_TOKEN) => {
                let token = self.refresh_access_token().await?;
                self.session.set_access_token(token);
                self.send(method, path, body).await
            }
            outcome => outcome,
        }
    }

    /// One shared refresh per expiry window: the first caller hits the
    /// endpoint, everyone else waits for its outcome. Any refresh failure is
    /// terminal and logs the session out.
    async fn refresh_access_token(&self) -> Result<String, ClientError> {
        match self.gate.join() {
            Ticket::Leader => {
                let outcome = self.call_refresh_endpoint().await;
                self.gate.resolve(&outcome);
                match outcome {
                    Some(token) => Ok(token),
                    None => {
                        self.session.clear();
                        Err(ClientError::SessionExpired)
                    }
                }
            }
            Ticket::Follower(rx) => match rx.await {
                Ok(Some(token)) => Ok(token),
                // Leader failed (or vanished); it already cleared the state.
                Ok(None) | Err(_) => Err(ClientError::SessionExpired),
            },
        }
    }

    async fn call_refresh_endpoint(&self) -> Option<String> {
        // Never routed through `request`: a refresh failure must not trigger
        // another refresh.
        let data = self.send(Method::POST, "auth/refresh", None).await.ok()?;
        data["accessToken"].as_str().map(str::to_string)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ClientError> {
        let url = self.base_url.join(path)?;
        let mut request = self.http.request(method, url);
        if let Some(token) = self.session.access_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let envelope: Envelope = response.json().await?;

        if envelope.success {
            Ok(envelope.data.unwrap_or(Value::Null))
        } else {
            Err(classify(&envelope))
        }
    }

    fn adopt_access_token(&self, data: &Value) {
        if let Some(token) = data["accessToken"].as_str() {
            self.session.set_access_token(token.to_string());
        }
    }
}

/// The one place failures are classified. Call sites downstream only match
/// on the resulting variants.
fn classify(envelope: &Envelope) -> ClientError {
    if envelope.code == StatusCode::FORBIDDEN.as_u16() && envelope.trace == trace::REAUTH_REQUIRED {
        return ClientError::ReauthRequired;
    }
    ClientError::Api {
        code: envelope.code,
        trace: envelope.trace.clone(),
        message: envelope.message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(code: u16, trace: &str) -> Envelope {
        Envelope {
            code,
            success: false,
            message: "nope".to_string(),
            trace: trace.to_string(),
            data: None,
        }
    }

    #[test]
    fn reauth_challenge_classified_once() {
        let err = classify(&envelope(403, trace::REAUTH_REQUIRED));
        assert!(matches!(err, ClientError::ReauthRequired));
    }

    #[test]
    fn other_403s_stay_plain_api_errors() {
        let err = classify(&envelope(403, trace::INVALID_ACCESS_TOKEN));
        assert!(err.matches(403, trace::INVALID_ACCESS_TOKEN));

        let err = classify(&envelope(403, trace::SESSION_EXPIRED));
        assert!(err.matches(403, trace::SESSION_EXPIRED));
    }

    #[test]
    fn matches_requires_exact_pair() {
        let err = classify(&envelope(401, trace::NO_ACCESS_TOKEN));
        assert!(!err.matches(403, trace::NO_ACCESS_TOKEN));
        assert!(!err.matches(401, trace::INVALID_ACCESS_TOKEN));
        assert!(err.matches(401, trace::NO_ACCESS_TOKEN));
    }
}
