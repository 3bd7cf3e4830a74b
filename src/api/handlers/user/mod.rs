//! Authenticated account operations; the sensitive ones sit behind the
//! step-up freshness gate.

pub mod account;
pub mod session;
pub mod settings;
