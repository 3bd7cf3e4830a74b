//! Session lifecycle: registration, login, refresh, step-up and logout.

pub mod login;
pub mod principal;
pub mod reauth;
pub mod refresh;
pub mod session;
pub mod state;
pub mod storage;
pub mod tokens;
pub mod types;
pub mod utils;

pub use self::state::{AuthConfig, AuthState};
