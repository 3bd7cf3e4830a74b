//! In-memory client session state.
//!
//! The access token lives here and only here; it is never persisted. The
//! refresh token is invisible to this code entirely, it rides in the cookie
//! store.

use serde_json::Value;
use std::sync::Mutex;

fn relaxed<T>(guard: Result<T, std::sync::PoisonError<T>>) -> T {
    guard.unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
pub struct SessionState {
    access_token: Mutex<Option<String>>,
}

impl SessionState {
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        relaxed(self.access_token.lock()).clone()
    }

    /// Adopt a token, e.g. one restored by an embedding application.
    pub fn set_access_token(&self, token: String) {
        *relaxed(self.access_token.lock()) = Some(token);
    }

    /// Forget the session. Called on logout and on any terminal refresh
    /// failure.
    pub(crate) fn clear(&self) {
        *relaxed(self.access_token.lock()) = None;
    }

    pub fn logged_in(&self) -> bool {
        relaxed(self.access_token.lock()).is_some()
    }
}

/// Two-copy settings state for optimistic updates: `tentative` is what the
/// UI renders, `confirmed` is what the server last acknowledged.
#[derive(Default)]
pub struct SettingsState {
    inner: Mutex<SettingsSnapshot>,
}

#[derive(Default, Clone)]
struct SettingsSnapshot {
    confirmed: Value,
    tentative: Value,
}

impl SettingsState {
    /// Apply a change locally before the server has confirmed it.
    pub fn apply_tentative(&self, settings: Value) {
        relaxed(self.inner.lock()).tentative = settings;
    }

    /// Server acknowledged: the tentative value becomes truth.
    pub fn confirm(&self, settings: Value) {
        let mut inner = relaxed(self.inner.lock());
        inner.confirmed = settings.clone();
        inner.tentative = settings;
    }

    /// Server rejected or the request failed: roll back to the last
    /// confirmed document.
    pub fn rollback(&self) {
        let mut inner = relaxed(self.inner.lock());
        inner.tentative = inner.confirmed.clone();
    }

    #[must_use]
    pub fn current(&self) -> Value {
        relaxed(self.inner.lock()).tentative.clone()
    }

    #[must_use]
    pub fn confirmed(&self) -> Value {
        relaxed(self.inner.lock()).confirmed.clone()
    }
}
