//! Response envelope and error taxonomy.
//!
//! Every response, success or failure, carries the same JSON envelope:
//! `{code, success, message, trace}` plus `data` on success. Clients branch
//! on the exact `(code, trace)` pair, never on the HTTP status alone, to tell
//! "access token expired, refresh and retry" apart from "step-up required"
//! and "session unrecoverable, log out".
//!
//! Classification happens at the point of failure: each site constructs a
//! fully-described [`ApiError`]. The edge ([`IntoResponse`]) only formats and
//! logs, it never reclassifies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

/// Stable trace identifiers, matched verbatim by the client interceptor and
/// the reauth coordinator.
pub mod trace {
    /// Bearer header missing entirely.
    pub const NO_ACCESS_TOKEN: &str = "auth_guard/no_access_token";
    /// Access token failed strict verification. The client treats exactly
    /// this pair as "refresh and retry".
    pub const INVALID_ACCESS_TOKEN: &str = "auth_guard/invalid_access_token";
    /// Token verified but the account no longer exists.
    pub const AUTH_NO_USER: &str = "auth_guard/no_user";

    /// Password re-entry window elapsed. The client treats exactly this pair
    /// as "suspend the operation and prompt".
    pub const REAUTH_REQUIRED: &str = "reauth_gate/auth_expired";
    /// Wrong password during step-up re-verification.
    pub const REAUTH_INCORRECT_PASSWORD: &str = "reauth/incorrect_password";
    pub const REAUTH_VALIDATION: &str = "reauth/validation_failure";

    /// Access token has no live refresh record sharing its session uuid
    /// (revoked by logout or rotation between issuance and use).
    pub const NO_SESSION_RECORD: &str = "session/no_record";

    /// Terminal refresh failure. Every way the refresh endpoint can fail
    /// (missing cookie, unknown account, missing or expired record, hash
    /// mismatch) collapses to this one pair on the wire; the distinction
    /// lives in the server log. The client treats it as "log out".
    pub const SESSION_EXPIRED: &str = "refresh/session_expired";

    pub const REGISTER_VALIDATION: &str = "register/validation_failure";
    pub const REGISTER_EMAIL_EXISTS: &str = "register/email_exists";
    pub const REGISTER_USERNAME_EXISTS: &str = "register/username_exists";
    pub const LOGIN_VALIDATION: &str = "login/validation_failure";
    pub const LOGIN_NO_USER: &str = "login/no_user";
    pub const LOGIN_INCORRECT_CREDENTIALS: &str = "login/incorrect_credentials";

    pub const PASSWORD_VALIDATION: &str = "password/validation_failure";
    pub const PASSWORD_INCORRECT_CURRENT: &str = "password/incorrect_current";
    pub const EMAIL_VALIDATION: &str = "email/validation_failure";
    pub const EMAIL_EXISTS: &str = "email/email_exists";
    pub const SETTINGS_VALIDATION: &str = "settings/validation_failure";
    pub const MISSING_PAYLOAD: &str = "request/missing_payload";

    pub const INTERNAL: &str = "internal/unexpected";
}

const SESSION_INVALID_MESSAGE: &str = "Session is invalid. Please log in again.";

/// A fully-classified request failure.
///
/// `message` is user-facing; `context` explains the failure for logs and
/// never leaves the server.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub context: &'static str,
    pub trace: &'static str,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        message: impl Into<String>,
        context: &'static str,
        trace: &'static str,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            context,
            trace,
        }
    }

    /// Shorthand for the session-fatal family that all share one user message.
    pub fn session_invalid(status: StatusCode, context: &'static str, trace: &'static str) -> Self {
        Self::new(status, SESSION_INVALID_MESSAGE, context, trace)
    }

    pub fn validation(message: impl Into<String>, trace: &'static str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            message,
            "One or more request fields failed validation",
            trace,
        )
    }

    pub fn missing_payload() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "Missing payload",
            "Request body absent or not valid JSON",
            trace::MISSING_PAYLOAD,
        )
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Unexpected failure: {err:?}");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Something went wrong. Please try again later.",
            "Unclassified failure, see server log",
            trace::INTERNAL,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(trace = self.trace, context = self.context, "{}", self.message);
        } else {
            debug!(trace = self.trace, context = self.context, "{}", self.message);
        }

        let body = Json(json!({
            "code": self.status.as_u16(),
            "success": false,
            "message": self.message,
            "trace": self.trace,
        }));

        (self.status, body).into_response()
    }
}

/// Success envelope wrapping an optional data payload.
#[derive(Debug)]
pub struct ApiReply<T: Serialize> {
    pub status: StatusCode,
    pub message: String,
    pub trace: &'static str,
    pub data: Option<T>,
}

impl<T: Serialize> ApiReply<T> {
    pub fn new(status: StatusCode, message: impl Into<String>, trace: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            trace,
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }
}

impl<T: Serialize> IntoResponse for ApiReply<T> {
    fn into_response(self) -> Response {
        let mut body = json!({
            "code": self.status.as_u16(),
            "success": true,
            "message": self.message,
            "trace": self.trace,
        });
        if let Some(data) = self.data {
            match serde_json::to_value(data) {
                Ok(value) => {
                    body["data"] = value;
                }
                Err(err) => {
                    return ApiError::from(anyhow::Error::from(err)).into_response();
                }
            }
        }

        (self.status, Json(body)).into_response()
    }
}
