//! Generated `OpenAPI` document, served as plain JSON.

use axum::Json;
use utoipa::OpenApi;

use super::handlers::{auth, health, user};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login::register,
        auth::login::login,
        auth::login::email_available,
        auth::login::username_available,
        auth::refresh::refresh,
        auth::reauth::reauth,
        auth::reauth::logout,
        user::session::fetch_session,
        user::session::reauth_status,
        user::account::change_password,
        user::account::change_email,
        user::account::delete_account,
        user::settings::update_settings,
    ),
    tags(
        (name = "auth", description = "Session lifecycle"),
        (name = "user", description = "Account operations"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
