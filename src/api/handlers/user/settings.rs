//! Settings document storage.
//!
//! The server does not interpret individual settings; it validates shape and
//! size, stores the document and echoes it back. The echo is the client's
//! confirmation point for optimistic updates.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use crate::api::error::{trace, ApiError, ApiReply};
use crate::api::handlers::auth::{principal::require_auth, state::AuthState, storage};

const SETTINGS_MAX_BYTES: usize = 16 * 1024;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsPayload {
    pub settings: Value,
}

fn valid_settings(settings: &Value) -> bool {
    settings.is_object()
}

#[utoipa::path(
    patch,
    path = "/user/settings",
    responses(
        (status = 200, description = "Settings stored and echoed back"),
        (status = 409, description = "Settings document rejected"),
    ),
    tag = "user",
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn update_settings(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<UpdateSettingsPayload>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &state).await?;

    let Some(Json(payload)) = payload else {
        return Err(ApiError::missing_payload());
    };
    if !valid_settings(&payload.settings) {
        return Err(ApiError::validation(
            "Settings must be a JSON object.",
            trace::SETTINGS_VALIDATION,
        ));
    }

    let serialized = serde_json::to_string(&payload.settings)
        .map_err(|err| ApiError::from(anyhow::Error::from(err)))?;
    if serialized.len() > SETTINGS_MAX_BYTES {
        return Err(ApiError::validation(
            "Settings document is too large.",
            trace::SETTINGS_VALIDATION,
        ));
    }

    storage::update_settings(&pool, principal.account.id, &serialized).await?;

    Ok(
        ApiReply::new(StatusCode::OK, "Settings updated.", "settings/success")
            .with_data(payload.settings)
            .into_response(),
    )
}
