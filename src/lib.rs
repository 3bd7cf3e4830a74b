//! # Syncspace (Session & Identity Core)
//!
//! `syncspace` is the backend of a social platform together with the client
//! half of its session protocol. The HTTP API covers account lifecycle
//! (register, login, logout), silent access-token refresh with rotating
//! refresh tokens, and step-up reauthentication for sensitive operations.
//!
//! ## Sessions
//!
//! A session is a pair of HS256 tokens sharing one `session uuid`:
//!
//! - **Access token**: short-lived, returned in response bodies, sent back as
//!   a bearer header. Never persisted server-side.
//! - **Refresh token**: long-lived, delivered only as an `HttpOnly` cookie
//!   scoped to the refresh path. The database stores a SHA-256 hash of it,
//!   one row per device, keyed by the session uuid.
//!
//! Rotation always mints a fresh session uuid and atomically replaces the old
//! row, so a replayed pre-rotation token can be detected by hash mismatch or
//! by the missing row.
//!
//! ## Step-up reauthentication
//!
//! Sensitive routes require that the password was re-entered within a
//! configurable window. The freshness anchor is `last_login_at` on the
//! refresh-token row: silent refresh carries it over untouched, only an
//! explicit password re-check resets it.
//!
//! ## Client
//!
//! [`client`] implements the request pipeline a browser client would run:
//! bearer attachment, expiry-driven refresh serialized behind a single
//! in-flight gate, and a coordinator that suspends a step-up-challenged
//! operation and replays it after a successful password prompt.

pub mod api;
pub mod cli;
pub mod client;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
